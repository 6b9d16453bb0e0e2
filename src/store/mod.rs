//! Local persistence with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database (default durable backend)
//!
//! The store holds four record families: task occurrences, flow answers,
//! sync cursors, and queued uploads. Each record updates atomically on its
//! own; no cross-record transactions are needed by the engines.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::flow::Answer;
use crate::sync::{QueuedUpload, SyncCursor};
use crate::task::{StudyTask, TaskId};

/// Errors from the persistence layer. All of them are treated as transient
/// by the engines: the mutation is retried on the owning component's next
/// cadence rather than surfaced as a crash.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Background(String),
}

/// Keyed persistence for the engines' durable state.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Whether this store survives process restarts.
    fn is_persistent(&self) -> bool;

    // Task occurrences, keyed by TaskId.

    async fn put_task(&self, task: &StudyTask) -> Result<(), StoreError>;
    async fn get_task(&self, id: TaskId) -> Result<Option<StudyTask>, StoreError>;
    async fn list_tasks(&self) -> Result<Vec<StudyTask>, StoreError>;
    async fn remove_task(&self, id: TaskId) -> Result<bool, StoreError>;

    // Flow answers, keyed by flow id (one record per completed traversal).

    async fn put_answers(&self, flow_id: &str, answers: &[Answer]) -> Result<(), StoreError>;
    async fn get_answers(&self, flow_id: &str) -> Result<Vec<Answer>, StoreError>;

    // Sync cursors, keyed by data type.

    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError>;
    async fn get_cursor(&self, data_type: &str) -> Result<Option<SyncCursor>, StoreError>;

    // Queued uploads, keyed by upload id.

    async fn put_upload(&self, upload: &QueuedUpload) -> Result<(), StoreError>;
    async fn list_uploads(&self) -> Result<Vec<QueuedUpload>, StoreError>;
    async fn remove_upload(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    Memory,
    #[default]
    Sqlite,
}

impl StoreKind {
    /// Parse from an environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Create a store based on kind and base directory.
pub async fn create_store(
    kind: StoreKind,
    base_dir: PathBuf,
) -> Result<Arc<dyn LocalStore>, StoreError> {
    match kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Sqlite => {
            let store = SqliteStore::open(base_dir).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TimeRange;
    use crate::task::Schedule;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_task() -> StudyTask {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        StudyTask::new(
            "weekly-survey",
            "Weekly survey",
            "How was your week?",
            Schedule::OneOff { at: start },
            vec!["HeartRate".to_string()],
            TimeRange::new(start, start + chrono::Duration::hours(1)),
        )
        .unwrap()
    }

    async fn roundtrip(store: &dyn LocalStore) {
        // Tasks.
        let task = sample_task();
        store.put_task(&task).await.unwrap();
        let loaded = store.get_task(task.id()).await.unwrap().unwrap();
        assert_eq!(loaded, task);
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
        assert!(store.remove_task(task.id()).await.unwrap());
        assert!(!store.remove_task(task.id()).await.unwrap());

        // Answers.
        let answers = vec![Answer::new("age", json!(34))];
        store.put_answers("onboarding", &answers).await.unwrap();
        assert_eq!(store.get_answers("onboarding").await.unwrap(), answers);
        assert!(store.get_answers("unknown").await.unwrap().is_empty());

        // Cursors.
        let mut cursor = SyncCursor::new(
            "HeartRate",
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        );
        store.put_cursor(&cursor).await.unwrap();
        cursor.advance_to(Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap());
        store.put_cursor(&cursor).await.unwrap();
        let loaded = store.get_cursor("HeartRate").await.unwrap().unwrap();
        assert_eq!(loaded, cursor);
        assert!(store.get_cursor("SleepSession").await.unwrap().is_none());

        // Uploads.
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let upload = QueuedUpload::buffered(
            "HeartRate",
            TimeRange::new(t0, t0 + chrono::Duration::minutes(15)),
            vec![crate::source::Sample::new(t0, json!({"bpm": 71}))],
            t0,
        );
        store.put_upload(&upload).await.unwrap();
        assert_eq!(store.list_uploads().await.unwrap(), vec![upload.clone()]);
        assert!(store.remove_upload(upload.id()).await.unwrap());
        assert!(store.list_uploads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(!store.is_persistent());
        roundtrip(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.is_persistent());
        roundtrip(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        {
            let store = SqliteStore::open(dir.path().to_path_buf()).await.unwrap();
            store.put_task(&task).await.unwrap();
        }
        let store = SqliteStore::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.get_task(task.id()).await.unwrap(), Some(task));
    }

    #[test]
    fn store_kind_parsing() {
        assert_eq!(StoreKind::from_str("memory"), StoreKind::Memory);
        assert_eq!(StoreKind::from_str("SQLITE"), StoreKind::Sqlite);
        assert_eq!(StoreKind::from_str("anything"), StoreKind::Sqlite);
    }
}
