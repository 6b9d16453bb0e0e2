//! Offline upload queue.
//!
//! Buffers sample batches that could not be delivered (backend failure or
//! detected disconnection). Entries survive restarts through the local
//! store and are removed only on backend acknowledgment, so no data range
//! is ever silently dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use crate::source::{Sample, TimeRange};
use crate::store::{LocalStore, StoreError};

/// A buffered batch of samples for one data type and one time range,
/// awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedUpload {
    id: Uuid,
    data_type: String,
    range: TimeRange,
    samples: Vec<Sample>,
    /// Delivery attempts that have failed so far.
    attempts: u32,
    next_retry: DateTime<Utc>,
    /// Attempts exhausted; held for visibility, not retried automatically.
    failed: bool,
}

impl QueuedUpload {
    /// Buffer a batch that has not been attempted yet (offline detection).
    pub fn buffered(
        data_type: impl Into<String>,
        range: TimeRange,
        samples: Vec<Sample>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_type: data_type.into(),
            range,
            samples,
            attempts: 0,
            next_retry: now,
            failed: false,
        }
    }

    /// Buffer a batch whose first delivery attempt just failed.
    pub fn after_failure(
        data_type: impl Into<String>,
        range: TimeRange,
        samples: Vec<Sample>,
        next_retry: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_type: data_type.into(),
            range,
            samples,
            attempts: 1,
            next_retry,
            failed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_retry(&self) -> DateTime<Utc> {
        self.next_retry
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.failed && self.next_retry <= now
    }

    pub(crate) fn record_failure(&mut self, next_retry: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.next_retry = next_retry;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub(crate) fn reset_for_retry(&mut self) {
        self.failed = false;
        self.attempts = 0;
        // Ranges lie in the past, so this is immediately eligible.
        self.next_retry = self.range.end;
    }
}

/// Store-backed queue of [`QueuedUpload`] entries, kept oldest-first per
/// data type. A stuck data type never blocks the others: every accessor is
/// keyed by type.
pub struct OfflineQueue {
    store: Arc<dyn LocalStore>,
    entries: RwLock<Vec<QueuedUpload>>,
}

impl OfflineQueue {
    /// Load the persisted queue from the store.
    pub async fn load(store: Arc<dyn LocalStore>) -> Result<Self, StoreError> {
        let mut entries = store.list_uploads().await?;
        entries.sort_by_key(|e| (e.data_type.clone(), e.range.start));
        Ok(Self {
            store,
            entries: RwLock::new(entries),
        })
    }

    /// Add a new entry, persisting it first.
    ///
    /// A persistence failure keeps the entry in memory (it is still retried
    /// while the process lives) and is logged; the next successful update
    /// writes it through.
    pub async fn push(&self, upload: QueuedUpload) {
        if let Err(err) = self.store.put_upload(&upload).await {
            error!(
                data_type = %upload.data_type,
                range = %upload.range,
                error = %err,
                "Failed to persist queued upload; keeping it in memory"
            );
        }
        let mut entries = self.entries.write().await;
        entries.push(upload);
        entries.sort_by_key(|e| (e.data_type.clone(), e.range.start));
    }

    /// Write back an updated entry (attempt count, retry time, failed flag).
    pub async fn update(&self, upload: &QueuedUpload) {
        if let Err(err) = self.store.put_upload(upload).await {
            error!(id = %upload.id, error = %err, "Failed to persist queued upload update");
        }
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == upload.id) {
            *existing = upload.clone();
        }
    }

    /// Remove an acknowledged entry.
    pub async fn ack(&self, id: Uuid) {
        match self.store.remove_upload(id).await {
            Ok(_) => {}
            Err(err) => {
                // The entry will be re-acked on a later replay; delivery is
                // idempotent so the duplicate is harmless.
                warn!(id = %id, error = %err, "Failed to remove acknowledged upload from store");
            }
        }
        self.entries.write().await.retain(|e| e.id != id);
    }

    /// Oldest non-failed entry for `data_type`, if any.
    pub async fn oldest_pending(&self, data_type: &str) -> Option<QueuedUpload> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.data_type == data_type && !e.failed)
            .cloned()
    }

    /// End of the newest buffered range for `data_type`, or `fallback` when
    /// the queue holds nothing for it. The scheduler pulls fresh samples
    /// from this frontier so buffered ranges are never pulled twice.
    pub async fn frontier(&self, data_type: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.data_type == data_type)
            .map(|e| e.range.end)
            .max()
            .map_or(fallback, |end| end.max(fallback))
    }

    pub async fn has_failed(&self, data_type: &str) -> bool {
        self.entries
            .read()
            .await
            .iter()
            .any(|e| e.data_type == data_type && e.failed)
    }

    pub async fn pending_count(&self, data_type: &str) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.data_type == data_type && !e.failed)
            .count()
    }

    pub async fn is_empty_for(&self, data_type: &str) -> bool {
        !self
            .entries
            .read()
            .await
            .iter()
            .any(|e| e.data_type == data_type)
    }

    /// Reset failed entries for `data_type` so replay picks them up again.
    /// Returns how many entries were reset.
    pub async fn clear_failed(&self, data_type: &str) -> usize {
        let mut reset = Vec::new();
        {
            let mut entries = self.entries.write().await;
            for entry in entries
                .iter_mut()
                .filter(|e| e.data_type == data_type && e.failed)
            {
                entry.reset_for_retry();
                reset.push(entry.clone());
            }
        }
        for entry in &reset {
            if let Err(err) = self.store.put_upload(entry).await {
                error!(id = %entry.id(), error = %err, "Failed to persist reset upload");
            }
        }
        reset.len()
    }

    /// Data types that currently have at least one entry.
    pub async fn data_types(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut types: Vec<String> = entries.iter().map(|e| e.data_type.clone()).collect();
        types.sort();
        types.dedup();
        types
    }
}
