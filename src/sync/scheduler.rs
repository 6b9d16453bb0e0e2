//! Periodic pull-and-push synchronization.
//!
//! Each configured data type gets its own worker. On every tick the worker
//! first replays the offline queue for its type (oldest range first), then
//! pulls the window from the delivery frontier to now and hands it to the
//! backend. The watermark only moves when the backend acknowledged a range,
//! so a teardown mid-upload simply retries after restart; the backend treats
//! `(data type, range)` as an idempotency key.
//!
//! Watermark advancement is serialized per type by the per-type lock;
//! different data types proceed fully independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFacade, DeliveryError};
use crate::config::{EngineConfig, SyncSpec};
use crate::source::{HealthDataSource, Sample, TimeRange};
use crate::store::{LocalStore, StoreError};

use super::backoff::BackoffPolicy;
use super::cursor::SyncCursor;
use super::queue::{OfflineQueue, QueuedUpload};

/// Condition of one data type's synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Everything delivered up to the watermark.
    Idle,
    /// Recent attempts failed; retrying under backoff.
    Retrying,
    /// A range exhausted its attempts (or was rejected); delivery for this
    /// type is paused until [`SyncScheduler::clear_failed`].
    Failed,
}

/// Snapshot of one data type's synchronization state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub data_type: String,
    pub watermark: DateTime<Utc>,
    pub pending_uploads: usize,
    pub consecutive_failures: u32,
    pub state: SyncState,
    pub last_error: Option<String>,
}

/// Mutable per-type state. The mutex serializes the worker tick against
/// manual kicks for the same type; the scheduler is the only writer of the
/// cursor inside.
struct TypeState {
    cursor: SyncCursor,
    consecutive_failures: u32,
    last_error: Option<String>,
}

struct SchedulerInner {
    specs: Vec<SyncSpec>,
    source: Arc<dyn HealthDataSource>,
    backend: Arc<dyn BackendFacade>,
    store: Arc<dyn LocalStore>,
    queue: OfflineQueue,
    backoff: BackoffPolicy,
    upload_timeout: Duration,
    types: HashMap<String, Mutex<TypeState>>,
    status_tx: broadcast::Sender<SyncStatus>,
    shutdown_tx: watch::Sender<bool>,
}

/// Periodically synchronizes health data per [`SyncSpec`], with offline
/// queueing and at-least-once delivery.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    /// Build a scheduler, resuming cursors and the offline queue from the
    /// store. A data type synced for the first time starts its watermark at
    /// construction time.
    pub async fn new(
        specs: Vec<SyncSpec>,
        source: Arc<dyn HealthDataSource>,
        backend: Arc<dyn BackendFacade>,
        store: Arc<dyn LocalStore>,
        config: &EngineConfig,
    ) -> Result<Self, StoreError> {
        let now = Utc::now();
        let mut types = HashMap::with_capacity(specs.len());
        for spec in &specs {
            let mut cursor = match store.get_cursor(&spec.data_type).await? {
                Some(cursor) => cursor,
                None => {
                    let cursor = SyncCursor::new(spec.data_type.clone(), now);
                    store.put_cursor(&cursor).await?;
                    cursor
                }
            };
            // An in-flight range from a torn-down upload was never
            // acknowledged; it falls back into the pull window.
            cursor.abort_upload();
            types.insert(
                spec.data_type.clone(),
                Mutex::new(TypeState {
                    cursor,
                    consecutive_failures: 0,
                    last_error: None,
                }),
            );
        }

        let queue = OfflineQueue::load(store.clone()).await?;
        let (status_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                specs,
                source,
                backend,
                store,
                queue,
                backoff: config.backoff.clone(),
                upload_timeout: config.upload_timeout,
                types,
                status_tx,
                shutdown_tx,
            }),
        })
    }

    /// Spawn one worker per spec. Call once; workers run until
    /// [`shutdown`](Self::shutdown).
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.inner
            .specs
            .iter()
            .cloned()
            .map(|spec| {
                let inner = self.inner.clone();
                let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    info!(spec = %spec, "Sync worker started");
                    let mut ticker = tokio::time::interval(spec.interval);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                let _ = inner.tick(&spec.data_type, Utc::now()).await;
                            }
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    debug!(data_type = %spec.data_type, "Sync worker stopping");
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Signal all workers to stop after their current tick.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Replay eligible queued uploads for every type, without waiting for
    /// the next worker tick. Fire-and-forget; progress is observable via
    /// [`subscribe`](Self::subscribe) and [`status`](Self::status).
    pub fn kick(&self) {
        for spec in &self.inner.specs {
            let inner = self.inner.clone();
            let data_type = spec.data_type.clone();
            tokio::spawn(async move {
                if let Some(state_lock) = inner.types.get(&data_type) {
                    let now = Utc::now();
                    let mut state = state_lock.lock().await;
                    inner.replay_queue(&data_type, &mut state, now).await;
                    inner.emit_status(&data_type, &state).await;
                }
            });
        }
    }

    /// Reset a type whose delivery was marked failed so it is retried
    /// again. Returns how many ranges were re-armed.
    pub async fn clear_failed(&self, data_type: &str) -> usize {
        let Some(state_lock) = self.inner.types.get(data_type) else {
            return 0;
        };
        let mut state = state_lock.lock().await;
        let reset = self.inner.queue.clear_failed(data_type).await;
        if reset > 0 {
            info!(data_type = %data_type, ranges = reset, "Re-armed failed upload ranges");
        }
        state.consecutive_failures = 0;
        state.last_error = None;
        self.inner.emit_status(data_type, &state).await;
        reset
    }

    /// Current status of every configured data type.
    pub async fn status(&self) -> Vec<SyncStatus> {
        let mut out = Vec::with_capacity(self.inner.specs.len());
        for spec in &self.inner.specs {
            if let Some(status) = self.status_of(&spec.data_type).await {
                out.push(status);
            }
        }
        out
    }

    pub async fn status_of(&self, data_type: &str) -> Option<SyncStatus> {
        let state_lock = self.inner.types.get(data_type)?;
        let state = state_lock.lock().await;
        Some(self.inner.snapshot(data_type, &state).await)
    }

    /// Subscribe to status snapshots emitted whenever a type's state
    /// changes (watermark advance, queueing, failure).
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Run one synchronization pass for `data_type` as of `now`.
    #[cfg(test)]
    async fn tick_at(&self, data_type: &str, now: DateTime<Utc>) -> Option<SyncStatus> {
        self.inner.tick(data_type, now).await
    }
}

impl SchedulerInner {
    /// One full pass for a data type: queue replay, then fresh pull.
    async fn tick(&self, data_type: &str, now: DateTime<Utc>) -> Option<SyncStatus> {
        let state_lock = self.types.get(data_type)?;
        let mut state = state_lock.lock().await;

        self.replay_queue(data_type, &mut state, now).await;

        // A failed range pins the watermark; pulling more data behind it
        // would only grow the backlog against a dead backend.
        if !self.queue.has_failed(data_type).await {
            self.pull_window(data_type, &mut state, now).await;
        }

        let status = self.snapshot(data_type, &state).await;
        let _ = self.status_tx.send(status.clone());
        Some(status)
    }

    /// Retry eligible queued uploads, oldest range first. Stops at the
    /// first entry that fails or is not yet eligible, preserving per-type
    /// delivery order.
    async fn replay_queue(&self, data_type: &str, state: &mut TypeState, now: DateTime<Utc>) {
        while let Some(mut entry) = self.queue.oldest_pending(data_type).await {
            if !entry.is_eligible(now) {
                break;
            }
            match self.try_upload(data_type, entry.range(), entry.samples()).await {
                Ok(()) => {
                    info!(
                        data_type = %data_type,
                        range = %entry.range(),
                        attempts = entry.attempts(),
                        "Queued upload acknowledged"
                    );
                    self.queue.ack(entry.id()).await;
                    state.cursor.advance_to(entry.range().end);
                    self.persist_cursor(&state.cursor).await;
                    state.consecutive_failures = 0;
                    state.last_error = None;
                }
                Err(err) => {
                    self.note_entry_failure(&mut entry, &err, now).await;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    state.last_error = Some(err.to_string());
                    break;
                }
            }
        }
    }

    /// Pull `[frontier, now)` from the source and deliver it.
    async fn pull_window(&self, data_type: &str, state: &mut TypeState, now: DateTime<Utc>) {
        let frontier = self
            .queue
            .frontier(data_type, state.cursor.watermark())
            .await;
        let window = TimeRange::new(frontier, now);
        if window.is_empty() {
            return;
        }

        let samples = match self.source.query(data_type, window).await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(data_type = %data_type, error = %err, "Health data query failed");
                state.last_error = Some(err.to_string());
                return;
            }
        };

        if samples.is_empty() {
            // Nothing to deliver. The watermark may only advance when no
            // unresolved in-flight gap remains behind this window.
            if self.queue.is_empty_for(data_type).await {
                state.cursor.advance_to(now);
                self.persist_cursor(&state.cursor).await;
            }
            return;
        }

        if !self.queue.is_empty_for(data_type).await {
            // Older ranges are still undelivered; buffer behind them so
            // ranges reach the backend in order.
            debug!(
                data_type = %data_type,
                range = %window,
                samples = samples.len(),
                "Buffering window behind queued backlog"
            );
            self.queue
                .push(QueuedUpload::buffered(data_type, window, samples, now))
                .await;
            return;
        }

        state.cursor.begin_upload(window);
        match self.try_upload(data_type, window, &samples).await {
            Ok(()) => {
                state.cursor.complete_upload();
                self.persist_cursor(&state.cursor).await;
                state.consecutive_failures = 0;
                state.last_error = None;
                info!(
                    data_type = %data_type,
                    watermark = %state.cursor.watermark(),
                    samples = samples.len(),
                    "Samples delivered, watermark advanced"
                );
            }
            Err(err) => {
                state.cursor.abort_upload();
                let next_retry = now + to_chrono(self.backoff.delay_for(1));
                let mut entry =
                    QueuedUpload::after_failure(data_type, window, samples, next_retry);
                if !err.is_transient() || self.backoff.is_exhausted(entry.attempts()) {
                    entry.mark_failed();
                    error!(
                        data_type = %data_type,
                        range = %window,
                        error = %err,
                        "Upload range marked failed"
                    );
                } else {
                    warn!(
                        data_type = %data_type,
                        range = %window,
                        error = %err,
                        retry_at = %next_retry,
                        "Upload failed, queued for retry"
                    );
                }
                self.queue.push(entry).await;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_error = Some(err.to_string());
            }
        }
    }

    /// Record a failed delivery attempt on a queued entry, marking it
    /// failed when attempts are exhausted or the backend rejected it.
    async fn note_entry_failure(
        &self,
        entry: &mut QueuedUpload,
        err: &DeliveryError,
        now: DateTime<Utc>,
    ) {
        let attempts = entry.attempts().saturating_add(1);
        let next_retry = now + to_chrono(self.backoff.delay_for(attempts));
        entry.record_failure(next_retry);

        if !err.is_transient() || self.backoff.is_exhausted(attempts) {
            entry.mark_failed();
            error!(
                data_type = %entry.data_type(),
                range = %entry.range(),
                attempts,
                error = %err,
                "Upload range marked failed after exhausting retries"
            );
        } else {
            warn!(
                data_type = %entry.data_type(),
                range = %entry.range(),
                attempts,
                error = %err,
                retry_at = %next_retry,
                "Queued upload retry failed"
            );
        }
        self.queue.update(entry).await;
    }

    /// Backend call under the configured timeout; a timeout is a transient
    /// delivery failure feeding the backoff policy.
    async fn try_upload(
        &self,
        data_type: &str,
        range: TimeRange,
        samples: &[Sample],
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(
            self.upload_timeout,
            self.backend.upload(data_type, range, samples),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Unavailable(format!(
                "upload of {range} timed out after {:?}",
                self.upload_timeout
            ))),
        }
    }

    async fn persist_cursor(&self, cursor: &SyncCursor) {
        // Transient by policy: the cursor is re-persisted on the next
        // advance, and a stale stored watermark only causes an idempotent
        // re-upload after restart.
        if let Err(err) = self.store.put_cursor(cursor).await {
            error!(data_type = %cursor.data_type(), error = %err, "Failed to persist sync cursor");
        }
    }

    async fn snapshot(&self, data_type: &str, state: &TypeState) -> SyncStatus {
        let failed = self.queue.has_failed(data_type).await;
        let sync_state = if failed {
            SyncState::Failed
        } else if state.consecutive_failures > 0 {
            SyncState::Retrying
        } else {
            SyncState::Idle
        };
        SyncStatus {
            data_type: data_type.to_string(),
            watermark: state.cursor.watermark(),
            pending_uploads: self.queue.pending_count(data_type).await,
            consecutive_failures: state.consecutive_failures,
            state: sync_state,
            last_error: state.last_error.clone(),
        }
    }

    async fn emit_status(&self, data_type: &str, state: &TypeState) {
        let status = self.snapshot(data_type, state).await;
        let _ = self.status_tx.send(status);
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;

    /// Opt into log output with `RUST_LOG=studysync=debug cargo test`.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn min(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    /// Source returning a fixed sample set, filtered to the queried range.
    struct FixedSource {
        samples: Vec<Sample>,
    }

    #[async_trait]
    impl HealthDataSource for FixedSource {
        async fn query(
            &self,
            _data_type: &str,
            range: TimeRange,
        ) -> Result<Vec<Sample>, crate::source::SourceError> {
            Ok(self
                .samples
                .iter()
                .filter(|s| range.contains(s.timestamp))
                .cloned()
                .collect())
        }
    }

    /// Backend with a scripted result sequence and a full upload log.
    /// Types in `fail_types` always fail with a transient error.
    #[derive(Default)]
    struct ScriptedBackend {
        script: StdMutex<VecDeque<Result<(), DeliveryError>>>,
        fail_types: HashSet<String>,
        uploads: StdMutex<Vec<(String, TimeRange, usize)>>,
    }

    impl ScriptedBackend {
        fn scripted(results: Vec<Result<(), DeliveryError>>) -> Self {
            Self {
                script: StdMutex::new(results.into()),
                ..Default::default()
            }
        }

        fn failing_for(data_type: &str) -> Self {
            Self {
                fail_types: HashSet::from([data_type.to_string()]),
                ..Default::default()
            }
        }

        fn upload_count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BackendFacade for ScriptedBackend {
        async fn upload(
            &self,
            data_type: &str,
            range: TimeRange,
            samples: &[Sample],
        ) -> Result<(), DeliveryError> {
            self.uploads
                .lock()
                .unwrap()
                .push((data_type.to_string(), range, samples.len()));
            if self.fail_types.contains(data_type) {
                return Err(DeliveryError::Unavailable("offline".to_string()));
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn fetch_tasks(
            &self,
        ) -> Result<Vec<crate::backend::TaskDefinition>, DeliveryError> {
            Ok(Vec::new())
        }
    }

    fn heart_rate_samples() -> Vec<Sample> {
        vec![
            Sample::new(t0() + min(1), json!({"bpm": 71})),
            Sample::new(t0() + min(6), json!({"bpm": 75})),
            Sample::new(t0() + min(11), json!({"bpm": 69})),
        ]
    }

    fn config_with(backoff: BackoffPolicy) -> EngineConfig {
        EngineConfig {
            backoff,
            ..EngineConfig::default()
        }
    }

    fn immediate_backoff() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_secs(0),
            max_delay: Duration::from_secs(0),
            multiplier: 2.0,
            max_attempts: 8,
        }
    }

    async fn scheduler_with(
        backend: Arc<ScriptedBackend>,
        samples: Vec<Sample>,
        config: EngineConfig,
    ) -> SyncScheduler {
        let store = Arc::new(MemoryStore::new());
        store
            .put_cursor(&SyncCursor::new("HeartRate", t0()))
            .await
            .unwrap();
        SyncScheduler::new(
            vec![SyncSpec::new("HeartRate", Duration::from_secs(15 * 60))],
            Arc::new(FixedSource { samples }),
            backend,
            store,
            &config,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn acknowledged_upload_advances_watermark() {
        // 15-minute HeartRate spec, three samples in [T, T+15m), backend acks.
        init_tracing();
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            EngineConfig::default(),
        )
        .await;

        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();

        assert_eq!(status.watermark, t0() + min(15));
        assert_eq!(status.pending_uploads, 0);
        assert_eq!(status.state, SyncState::Idle);

        let uploads = backend.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, TimeRange::new(t0(), t0() + min(15)));
        assert_eq!(uploads[0].2, 3);
    }

    #[tokio::test]
    async fn failed_upload_queues_then_retry_succeeds() {
        // First attempt fails, retry succeeds: exactly one queue entry is
        // created and then removed; watermark ends at T+15m.
        init_tracing();
        let backend = Arc::new(ScriptedBackend::scripted(vec![
            Err(DeliveryError::Unavailable("connection reset".to_string())),
            Ok(()),
        ]));
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            config_with(immediate_backoff()),
        )
        .await;

        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();
        assert_eq!(status.watermark, t0());
        assert_eq!(status.pending_uploads, 1);
        assert_eq!(status.state, SyncState::Retrying);

        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();
        assert_eq!(status.watermark, t0() + min(15));
        assert_eq!(status.pending_uploads, 0);
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(backend.upload_count(), 2);
    }

    #[tokio::test]
    async fn reticking_a_delivered_range_uploads_nothing() {
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            EngineConfig::default(),
        )
        .await;

        let _ = scheduler.tick_at("HeartRate", t0() + min(15)).await;
        assert_eq!(backend.upload_count(), 1);

        // Same instant again: the window is empty, nothing is re-sent.
        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();
        assert_eq!(backend.upload_count(), 1);
        assert_eq!(status.watermark, t0() + min(15));
    }

    #[tokio::test]
    async fn empty_result_still_advances_watermark() {
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler =
            scheduler_with(backend.clone(), Vec::new(), EngineConfig::default()).await;

        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();
        assert_eq!(status.watermark, t0() + min(15));
        assert_eq!(backend.upload_count(), 0);
    }

    #[tokio::test]
    async fn watermark_never_passes_an_unacknowledged_range() {
        let backend = Arc::new(ScriptedBackend::failing_for("HeartRate"));
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            config_with(BackoffPolicy {
                base_delay: Duration::from_secs(3600),
                ..BackoffPolicy::default()
            }),
        )
        .await;

        let _ = scheduler.tick_at("HeartRate", t0() + min(15)).await;
        let status = scheduler
            .tick_at("HeartRate", t0() + min(30))
            .await
            .unwrap();
        assert_eq!(status.watermark, t0());
        assert!(status.pending_uploads >= 1);
    }

    #[tokio::test]
    async fn backlog_preserves_per_type_range_order() {
        // One failed range queued with a long retry delay; a later window
        // with fresh samples must buffer behind it, not overtake it.
        let samples = vec![
            Sample::new(t0() + min(5), json!({"bpm": 70})),
            Sample::new(t0() + min(20), json!({"bpm": 80})),
        ];
        let backend = Arc::new(ScriptedBackend::scripted(vec![Err(
            DeliveryError::Unavailable("offline".to_string()),
        )]));
        let scheduler = scheduler_with(
            backend.clone(),
            samples,
            config_with(BackoffPolicy {
                base_delay: Duration::from_secs(3600),
                ..BackoffPolicy::default()
            }),
        )
        .await;

        let _ = scheduler.tick_at("HeartRate", t0() + min(15)).await;
        assert_eq!(backend.upload_count(), 1);

        let status = scheduler
            .tick_at("HeartRate", t0() + min(30))
            .await
            .unwrap();
        // The second window was buffered without an upload attempt.
        assert_eq!(backend.upload_count(), 1);
        assert_eq!(status.pending_uploads, 2);
        assert_eq!(status.watermark, t0());
    }

    #[tokio::test]
    async fn exhausted_attempts_mark_the_range_failed() {
        let backend = Arc::new(ScriptedBackend::failing_for("HeartRate"));
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            config_with(BackoffPolicy {
                base_delay: Duration::from_secs(0),
                max_delay: Duration::from_secs(0),
                multiplier: 2.0,
                max_attempts: 2,
            }),
        )
        .await;

        let _ = scheduler.tick_at("HeartRate", t0() + min(15)).await;
        let status = scheduler
            .tick_at("HeartRate", t0() + min(16))
            .await
            .unwrap();
        assert_eq!(status.state, SyncState::Failed);
        assert_eq!(status.pending_uploads, 0);
        assert_eq!(status.watermark, t0());

        // A failed type stops attempting deliveries.
        let uploads_so_far = backend.upload_count();
        let _ = scheduler.tick_at("HeartRate", t0() + min(30)).await;
        assert_eq!(backend.upload_count(), uploads_so_far);
    }

    #[tokio::test]
    async fn rejected_upload_fails_immediately() {
        let backend = Arc::new(ScriptedBackend::scripted(vec![Err(
            DeliveryError::Rejected("unknown data type".to_string()),
        )]));
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            config_with(immediate_backoff()),
        )
        .await;

        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();
        assert_eq!(status.state, SyncState::Failed);
        assert_eq!(backend.upload_count(), 1);
    }

    #[tokio::test]
    async fn clear_failed_re_arms_delivery() {
        let backend = Arc::new(ScriptedBackend::scripted(vec![
            Err(DeliveryError::Unavailable("offline".to_string())),
            Err(DeliveryError::Unavailable("offline".to_string())),
            Ok(()),
        ]));
        let scheduler = scheduler_with(
            backend.clone(),
            heart_rate_samples(),
            config_with(BackoffPolicy {
                base_delay: Duration::from_secs(0),
                max_delay: Duration::from_secs(0),
                multiplier: 2.0,
                max_attempts: 2,
            }),
        )
        .await;

        let _ = scheduler.tick_at("HeartRate", t0() + min(15)).await;
        let _ = scheduler.tick_at("HeartRate", t0() + min(16)).await;
        assert_eq!(
            scheduler.status_of("HeartRate").await.unwrap().state,
            SyncState::Failed
        );

        assert_eq!(scheduler.clear_failed("HeartRate").await, 1);
        let status = scheduler
            .tick_at("HeartRate", t0() + min(17))
            .await
            .unwrap();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.watermark, t0() + min(17));
    }

    #[tokio::test]
    async fn data_types_fail_independently() {
        // HeartRate is stuck; SleepSession keeps advancing.
        let store = Arc::new(MemoryStore::new());
        store
            .put_cursor(&SyncCursor::new("HeartRate", t0()))
            .await
            .unwrap();
        store
            .put_cursor(&SyncCursor::new("SleepSession", t0()))
            .await
            .unwrap();
        let backend = Arc::new(ScriptedBackend::failing_for("HeartRate"));
        let samples = vec![
            Sample::new(t0() + min(2), json!({"bpm": 70})),
            Sample::new(t0() + min(3), json!({"stage": "rem"})),
        ];
        let scheduler = SyncScheduler::new(
            vec![
                SyncSpec::new("HeartRate", Duration::from_secs(900)),
                SyncSpec::new("SleepSession", Duration::from_secs(900)),
            ],
            Arc::new(FixedSource { samples }),
            backend,
            store,
            &config_with(immediate_backoff()),
        )
        .await
        .unwrap();

        let _ = scheduler.tick_at("HeartRate", t0() + min(15)).await;
        let sleep = scheduler
            .tick_at("SleepSession", t0() + min(15))
            .await
            .unwrap();

        assert_eq!(sleep.watermark, t0() + min(15));
        assert_eq!(sleep.state, SyncState::Idle);
        let heart = scheduler.status_of("HeartRate").await.unwrap();
        assert_eq!(heart.watermark, t0());
        assert_eq!(heart.state, SyncState::Retrying);
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_state() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_cursor(&SyncCursor::new("HeartRate", t0()))
            .await
            .unwrap();

        // First process: upload fails and is queued.
        {
            let backend = Arc::new(ScriptedBackend::failing_for("HeartRate"));
            let scheduler = SyncScheduler::new(
                vec![SyncSpec::new("HeartRate", Duration::from_secs(900))],
                Arc::new(FixedSource {
                    samples: heart_rate_samples(),
                }),
                backend,
                store.clone(),
                &config_with(immediate_backoff()),
            )
            .await
            .unwrap();
            scheduler.tick_at("HeartRate", t0() + min(15)).await;
        }

        // Second process: queue and cursor come back from the store, and
        // the buffered range is delivered.
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = SyncScheduler::new(
            vec![SyncSpec::new("HeartRate", Duration::from_secs(900))],
            Arc::new(FixedSource { samples: Vec::new() }),
            backend.clone(),
            store,
            &config_with(immediate_backoff()),
        )
        .await
        .unwrap();

        let status = scheduler
            .tick_at("HeartRate", t0() + min(15))
            .await
            .unwrap();
        assert_eq!(status.watermark, t0() + min(15));
        assert_eq!(status.pending_uploads, 0);
        assert_eq!(backend.upload_count(), 1);
    }
}
