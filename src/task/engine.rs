//! Task lifecycle engine.
//!
//! Owns the task set and is its only mutator. The home screen observes the
//! three partitions (`active`, `today`, `completed`) through watch channels
//! that re-emit whenever the task set changes, and drives the engine with
//! `begin`/`done`/`cancel`/`sync_tasks`.
//!
//! A periodic sweep activates occurrences whose window opened, applies the
//! missed-window policy to occurrences whose window elapsed, and
//! re-instantiates the next occurrence of recurring tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFacade, DeliveryError, TaskDefinition};
use crate::config::{EngineConfig, MissedWindowPolicy};
use crate::source::TimeRange;
use crate::store::{LocalStore, StoreError};
use crate::sync::SyncScheduler;

use super::task::{StudyTask, TaskError, TaskId, TaskState};

/// Errors surfaced by engine commands.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("no task with id {0}")]
    UnknownTask(TaskId),
}

struct EngineInner {
    tasks: RwLock<HashMap<TaskId, StudyTask>>,
    /// Tasks whose last persist failed; re-persisted on the next sweep.
    dirty: Mutex<HashSet<TaskId>>,
    store: Arc<dyn LocalStore>,
    backend: Arc<dyn BackendFacade>,
    scheduler: Option<SyncScheduler>,
    timezone: FixedOffset,
    missed_window: MissedWindowPolicy,
    sweep_interval: std::time::Duration,
    active_tx: watch::Sender<Vec<StudyTask>>,
    today_tx: watch::Sender<Vec<StudyTask>>,
    completed_tx: watch::Sender<Vec<StudyTask>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Tracks study tasks through their lifecycle and exposes the reactive
/// partitions the UI renders.
#[derive(Clone)]
pub struct TaskLifecycleEngine {
    inner: Arc<EngineInner>,
}

impl TaskLifecycleEngine {
    /// Build the engine, resuming the task set from the store.
    ///
    /// When a `scheduler` is supplied, [`sync_tasks`](Self::sync_tasks)
    /// also kicks its offline-queue replay.
    pub async fn new(
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn BackendFacade>,
        scheduler: Option<SyncScheduler>,
        config: &EngineConfig,
    ) -> Result<Self, StoreError> {
        let tasks: HashMap<TaskId, StudyTask> = store
            .list_tasks()
            .await?
            .into_iter()
            .map(|t| (t.id(), t))
            .collect();

        let (active_tx, _) = watch::channel(Vec::new());
        let (today_tx, _) = watch::channel(Vec::new());
        let (completed_tx, _) = watch::channel(Vec::new());
        let (shutdown_tx, _) = watch::channel(false);

        let engine = Self {
            inner: Arc::new(EngineInner {
                tasks: RwLock::new(tasks),
                dirty: Mutex::new(HashSet::new()),
                store,
                backend,
                scheduler,
                timezone: config.timezone,
                missed_window: config.missed_window,
                sweep_interval: config.sweep_interval,
                active_tx,
                today_tx,
                completed_tx,
                shutdown_tx,
            }),
        };
        engine.inner.recompute_partitions(Utc::now()).await;
        Ok(engine)
    }

    /// Tasks the participant can act on now. Re-emitted on every change.
    pub fn active_tasks(&self) -> watch::Receiver<Vec<StudyTask>> {
        self.inner.active_tx.subscribe()
    }

    /// Non-terminal tasks whose window intersects the current day.
    pub fn today_tasks(&self) -> watch::Receiver<Vec<StudyTask>> {
        self.inner.today_tx.subscribe()
    }

    /// Completed tasks, kept for history.
    pub fn completed_tasks(&self) -> watch::Receiver<Vec<StudyTask>> {
        self.inner.completed_tx.subscribe()
    }

    /// Register a locally defined task occurrence (studies can ship
    /// built-in tasks alongside backend-served ones).
    pub async fn add_task(&self, task: StudyTask) -> Result<(), EngineError> {
        self.inner.tasks.write().await.insert(task.id(), task.clone());
        self.inner.persist(&task).await;
        self.inner.recompute_partitions(Utc::now()).await;
        Ok(())
    }

    /// Snapshot of one task.
    pub async fn task(&self, id: TaskId) -> Option<StudyTask> {
        self.inner.tasks.read().await.get(&id).cloned()
    }

    /// Remove a task occurrence outright. This is the only way a task
    /// leaves the set (a study dropping it from its configuration);
    /// completion never deletes.
    pub async fn remove_task(&self, id: TaskId) -> Result<bool, EngineError> {
        let removed = self.inner.tasks.write().await.remove(&id).is_some();
        if removed {
            self.inner.store.remove_task(id).await?;
            info!(task_id = %id, "Task removed from study configuration");
            self.inner.recompute_partitions(Utc::now()).await;
        }
        Ok(removed)
    }

    /// The participant opened the task: `Active -> InProgress`.
    pub async fn begin(&self, id: TaskId) -> Result<(), EngineError> {
        self.inner
            .transition(id, Utc::now(), |task, _| task.begin())
            .await
    }

    /// The participant finished the task: `Active | InProgress ->
    /// Completed`, stamping the completion time.
    pub async fn done(&self, id: TaskId) -> Result<(), EngineError> {
        self.done_at(id, Utc::now()).await
    }

    /// The participant abandoned the task: `Active | InProgress ->
    /// Canceled`.
    pub async fn cancel(&self, id: TaskId) -> Result<(), EngineError> {
        self.inner
            .transition(id, Utc::now(), |task, _| task.cancel())
            .await
    }

    /// Refresh task definitions from the backend and replay any queued
    /// uploads. Returns immediately; completion is observed through the
    /// partition channels updating.
    pub fn sync_tasks(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.refresh().await {
                warn!(error = %err, "Task refresh failed");
            }
        });
    }

    /// The awaitable body of [`sync_tasks`](Self::sync_tasks).
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let definitions = self.inner.backend.fetch_tasks().await?;
        let now = Utc::now();
        self.inner.merge_definitions(definitions, now).await;
        if let Some(scheduler) = &self.inner.scheduler {
            scheduler.kick();
        }
        self.inner.recompute_partitions(now).await;
        Ok(())
    }

    /// Run one activation/expiry/recurrence pass.
    pub async fn sweep(&self) {
        self.inner.sweep_once(Utc::now()).await;
    }

    /// Spawn the periodic sweep worker. Call once; runs until
    /// [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(interval = ?inner.sweep_interval, "Task sweep worker started");
            let mut ticker = tokio::time::interval(inner.sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.sweep_once(Utc::now()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Task sweep worker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal the sweep worker to stop.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    async fn done_at(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.inner
            .transition(id, now, |task, at| task.complete(at))
            .await
    }
}

impl EngineInner {
    /// Apply a validated transition, persist the result, and re-emit the
    /// partitions.
    async fn transition<F>(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(&mut StudyTask, DateTime<Utc>) -> Result<(), TaskError>,
    {
        let updated = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&id).ok_or(EngineError::UnknownTask(id))?;
            apply(task, now)?;
            task.clone()
        };
        info!(task_id = %id, state = %updated.state(), "Task transitioned");
        self.persist(&updated).await;
        self.recompute_partitions(now).await;
        Ok(())
    }

    /// Merge fetched definitions into the task set: refresh display fields
    /// of open occurrences and instantiate occurrences for definitions
    /// that have none.
    async fn merge_definitions(&self, definitions: Vec<TaskDefinition>, now: DateTime<Utc>) {
        let mut changed = Vec::new();
        {
            let mut tasks = self.tasks.write().await;
            for def in definitions {
                let mut has_open = false;
                for task in tasks
                    .values_mut()
                    .filter(|t| t.definition_id() == def.id && !t.state().is_terminal())
                {
                    has_open = true;
                    if task.title() != def.title || task.description() != def.description {
                        task.apply_definition(&def.title, &def.description);
                        changed.push(task.clone());
                    }
                }
                if has_open {
                    continue;
                }
                let Some(start) = def.schedule.next_occurrence(now) else {
                    continue;
                };
                let window = TimeRange::new(start, start + to_chrono(def.window));
                match StudyTask::new(
                    &def.id,
                    &def.title,
                    &def.description,
                    def.schedule.clone(),
                    def.required_data_types.clone(),
                    window,
                ) {
                    Ok(task) => {
                        info!(
                            definition = %def.id,
                            window = %task.window(),
                            "Instantiated task occurrence"
                        );
                        changed.push(task.clone());
                        tasks.insert(task.id(), task);
                    }
                    Err(err) => {
                        warn!(definition = %def.id, error = %err, "Skipping malformed task definition");
                    }
                }
            }
        }
        for task in &changed {
            self.persist(task).await;
        }
    }

    /// One pass of the window/recurrence policies.
    async fn sweep_once(&self, now: DateTime<Utc>) {
        let mut changed = Vec::new();
        {
            let mut tasks = self.tasks.write().await;

            for task in tasks.values_mut() {
                if task.state() == TaskState::Scheduled
                    && task.window().contains(now)
                    && task.activate().is_ok()
                {
                    debug!(task_id = %task.id(), "Task window opened");
                    changed.push(task.clone());
                }
                if !task.state().is_terminal() && task.window_elapsed(now) {
                    match self.missed_window {
                        MissedWindowPolicy::Cancel => {
                            if task.expire().is_ok() {
                                warn!(
                                    task_id = %task.id(),
                                    window = %task.window(),
                                    "Task window elapsed without completion; canceled as missed"
                                );
                                changed.push(task.clone());
                            }
                        }
                        MissedWindowPolicy::Keep => {}
                    }
                }
            }

            // Recurring tasks: once an occurrence is terminal or its window
            // elapsed, line up the next one (a single open occurrence per
            // definition at a time).
            let open_definitions: HashSet<String> = tasks
                .values()
                .filter(|t| !t.state().is_terminal() && !t.window_elapsed(now))
                .map(|t| t.definition_id().to_string())
                .collect();

            let mut successors = Vec::new();
            let mut planned = HashSet::new();
            for task in tasks.values() {
                if !task.schedule().is_recurring()
                    || open_definitions.contains(task.definition_id())
                    || planned.contains(task.definition_id())
                {
                    continue;
                }
                let after = now.max(task.window().start + chrono::Duration::milliseconds(1));
                let Some(start) = task.schedule().next_occurrence(after) else {
                    continue;
                };
                let length = task.window().end - task.window().start;
                match StudyTask::new(
                    task.definition_id(),
                    task.title(),
                    task.description(),
                    task.schedule().clone(),
                    task.required_data_types().to_vec(),
                    TimeRange::new(start, start + length),
                ) {
                    Ok(next) => {
                        info!(
                            definition = %next.definition_id(),
                            window = %next.window(),
                            "Scheduled next recurring occurrence"
                        );
                        planned.insert(next.definition_id().to_string());
                        successors.push(next);
                    }
                    Err(err) => {
                        warn!(definition = %task.definition_id(), error = %err, "Could not schedule next occurrence");
                    }
                }
            }
            for next in successors {
                changed.push(next.clone());
                tasks.insert(next.id(), next);
            }
        }

        for task in &changed {
            self.persist(task).await;
        }
        self.retry_dirty().await;
        if !changed.is_empty() {
            self.recompute_partitions(now).await;
        }
    }

    /// Persist one task. A failure is transient: the task stays dirty and
    /// is re-persisted on the next sweep.
    async fn persist(&self, task: &StudyTask) {
        match self.store.put_task(task).await {
            Ok(()) => {
                self.dirty.lock().await.remove(&task.id());
            }
            Err(err) => {
                error!(task_id = %task.id(), error = %err, "Failed to persist task; will retry");
                self.dirty.lock().await.insert(task.id());
            }
        }
    }

    async fn retry_dirty(&self) {
        let pending: Vec<TaskId> = self.dirty.lock().await.iter().copied().collect();
        for id in pending {
            let snapshot = self.tasks.read().await.get(&id).cloned();
            if let Some(task) = snapshot {
                self.persist(&task).await;
            } else {
                self.dirty.lock().await.remove(&id);
            }
        }
    }

    /// Recompute and re-emit the three partitions. Within each partition a
    /// task id appears at most once; ordering is by window start.
    async fn recompute_partitions(&self, now: DateTime<Utc>) {
        let tasks = self.tasks.read().await;

        let mut active: Vec<StudyTask> = tasks
            .values()
            .filter(|t| t.state().is_actionable() && !t.window_elapsed(now))
            .cloned()
            .collect();

        let (day_start, day_end) = day_bounds(now, self.timezone);
        let mut today: Vec<StudyTask> = tasks
            .values()
            .filter(|t| {
                !t.state().is_terminal()
                    && t.window().start < day_end
                    && t.window().end > day_start
            })
            .cloned()
            .collect();

        let mut completed: Vec<StudyTask> = tasks
            .values()
            .filter(|t| t.state() == TaskState::Completed)
            .cloned()
            .collect();
        drop(tasks);

        for partition in [&mut active, &mut today, &mut completed] {
            partition.sort_by_key(|t| (t.window().start, t.id().as_uuid()));
        }

        self.active_tx.send_replace(active);
        self.today_tx.send_replace(today);
        self.completed_tx.send_replace(completed);
    }
}

/// Bounds of the wall-clock day containing `now` in `tz`, as UTC instants.
fn day_bounds(now: DateTime<Utc>, tz: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_day = now.with_timezone(&tz).date_naive();
    let midnight = local_day.and_hms_opt(0, 0, 0).unwrap_or_default();
    let start = match tz.from_local_datetime(&midnight).single() {
        Some(start) => start.with_timezone(&Utc),
        // Unreachable for fixed offsets; fall back to the instant itself.
        None => now,
    };
    (start, start + chrono::Duration::days(1))
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnswerRetention;
    use crate::store::MemoryStore;
    use crate::task::Schedule;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    struct StubBackend {
        definitions: StdMutex<Vec<TaskDefinition>>,
    }

    impl StubBackend {
        fn empty() -> Self {
            Self {
                definitions: StdMutex::new(Vec::new()),
            }
        }

        fn with(definitions: Vec<TaskDefinition>) -> Self {
            Self {
                definitions: StdMutex::new(definitions),
            }
        }
    }

    #[async_trait]
    impl BackendFacade for StubBackend {
        async fn upload(
            &self,
            _data_type: &str,
            _range: TimeRange,
            _samples: &[crate::source::Sample],
        ) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn fetch_tasks(&self) -> Result<Vec<TaskDefinition>, DeliveryError> {
            Ok(self.definitions.lock().unwrap().clone())
        }
    }

    async fn engine_with(backend: StubBackend) -> (TaskLifecycleEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = TaskLifecycleEngine::new(
            store.clone(),
            Arc::new(backend),
            None,
            &EngineConfig::default(),
        )
        .await
        .unwrap();
        (engine, store)
    }

    fn active_survey(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> StudyTask {
        let mut task = StudyTask::new(
            "morning-survey",
            "Morning survey",
            "How did you sleep?",
            Schedule::OneOff { at: window_start },
            vec![],
            TimeRange::new(window_start, window_end),
        )
        .unwrap();
        task.activate().unwrap();
        task
    }

    #[tokio::test]
    async fn done_completes_and_repartitions() {
        // Active task with window [9:00, 10:00); done at 9:30.
        let (engine, store) = engine_with(StubBackend::empty()).await;
        let task = active_survey(t(9, 0), t(10, 0));
        let id = task.id();
        engine.add_task(task).await.unwrap();

        let active_rx = engine.active_tasks();
        let completed_rx = engine.completed_tasks();

        engine.done_at(id, t(9, 30)).await.unwrap();

        let task = engine.task(id).await.unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.completed_at(), Some(t(9, 30)));

        let completed = completed_rx.borrow();
        assert!(completed.iter().any(|t| t.id() == id));
        let active = active_rx.borrow();
        assert!(!active.iter().any(|t| t.id() == id));

        // The change was persisted.
        let stored = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), TaskState::Completed);
    }

    #[tokio::test]
    async fn done_on_terminal_task_is_invalid() {
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let task = active_survey(t(9, 0), t(10, 0));
        let id = task.id();
        engine.add_task(task).await.unwrap();

        engine.done_at(id, t(9, 30)).await.unwrap();
        let err = engine.done_at(id, t(9, 40)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Task(TaskError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn remove_task_deletes_from_store() {
        let (engine, store) = engine_with(StubBackend::empty()).await;
        let task = active_survey(t(9, 0), t(10, 0));
        let id = task.id();
        engine.add_task(task).await.unwrap();

        assert!(engine.remove_task(id).await.unwrap());
        assert!(!engine.remove_task(id).await.unwrap());
        assert!(store.get_task(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn done_on_unknown_task_fails() {
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let err = engine.done(TaskId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn begin_moves_active_to_in_progress() {
        // begin() repartitions at the wall clock, so the window must
        // actually span it.
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let now = Utc::now();
        let task = active_survey(
            now - chrono::Duration::minutes(10),
            now + chrono::Duration::minutes(50),
        );
        let id = task.id();
        engine.add_task(task).await.unwrap();

        engine.begin(id).await.unwrap();
        assert_eq!(engine.task(id).await.unwrap().state(), TaskState::InProgress);

        // Still in the active partition.
        assert!(engine
            .active_tasks()
            .borrow()
            .iter()
            .any(|t| t.id() == id));
    }

    #[tokio::test]
    async fn sweep_activates_opened_windows() {
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let task = StudyTask::new(
            "evening-survey",
            "Evening survey",
            "",
            Schedule::OneOff { at: t(18, 0) },
            vec![],
            TimeRange::new(t(18, 0), t(20, 0)),
        )
        .unwrap();
        let id = task.id();
        engine.add_task(task).await.unwrap();

        engine.inner.sweep_once(t(17, 0)).await;
        assert_eq!(engine.task(id).await.unwrap().state(), TaskState::Scheduled);

        engine.inner.sweep_once(t(18, 30)).await;
        assert_eq!(engine.task(id).await.unwrap().state(), TaskState::Active);
    }

    #[tokio::test]
    async fn elapsed_window_cancels_as_missed() {
        // Active task whose window end passes without done/cancel.
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let task = active_survey(t(9, 0), t(10, 0));
        let id = task.id();
        engine.add_task(task).await.unwrap();

        engine.inner.sweep_once(t(10, 30)).await;

        let task = engine.task(id).await.unwrap();
        assert_eq!(task.state(), TaskState::Canceled);
        assert_eq!(task.completed_at(), None);
        assert!(!engine
            .active_tasks()
            .borrow()
            .iter()
            .any(|t| t.id() == id));
    }

    #[tokio::test]
    async fn keep_policy_leaves_elapsed_tasks_alone() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            missed_window: MissedWindowPolicy::Keep,
            answer_retention: AnswerRetention::Persist,
            ..EngineConfig::default()
        };
        let engine = TaskLifecycleEngine::new(
            store,
            Arc::new(StubBackend::empty()),
            None,
            &config,
        )
        .await
        .unwrap();

        let task = active_survey(t(9, 0), t(10, 0));
        let id = task.id();
        engine.add_task(task).await.unwrap();

        engine.inner.sweep_once(t(10, 30)).await;
        assert_eq!(engine.task(id).await.unwrap().state(), TaskState::Active);
    }

    #[tokio::test]
    async fn recurring_task_gets_next_occurrence_after_completion() {
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let mut task = StudyTask::new(
            "daily-checkin",
            "Daily check-in",
            "",
            Schedule::Recurring {
                first_at: t(9, 0),
                every: std::time::Duration::from_secs(86_400),
            },
            vec![],
            TimeRange::new(t(9, 0), t(10, 0)),
        )
        .unwrap();
        task.activate().unwrap();
        let id = task.id();
        engine.add_task(task).await.unwrap();

        engine.done_at(id, t(9, 15)).await.unwrap();
        engine.inner.sweep_once(t(9, 20)).await;

        let tasks = engine.inner.tasks.read().await;
        let successor = tasks
            .values()
            .find(|t| t.definition_id() == "daily-checkin" && t.id() != id)
            .expect("next occurrence should exist");
        assert_eq!(successor.state(), TaskState::Scheduled);
        assert_eq!(successor.window().start, t(9, 0) + chrono::Duration::days(1));
        assert_eq!(
            successor.window().end - successor.window().start,
            chrono::Duration::hours(1)
        );

        // Only one open occurrence per definition.
        assert_eq!(
            tasks
                .values()
                .filter(|t| t.definition_id() == "daily-checkin" && !t.state().is_terminal())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn sweep_does_not_duplicate_open_occurrences() {
        let (engine, _) = engine_with(StubBackend::empty()).await;
        let mut task = StudyTask::new(
            "daily-checkin",
            "Daily check-in",
            "",
            Schedule::Recurring {
                first_at: t(9, 0),
                every: std::time::Duration::from_secs(86_400),
            },
            vec![],
            TimeRange::new(t(9, 0), t(10, 0)),
        )
        .unwrap();
        task.activate().unwrap();
        engine.add_task(task).await.unwrap();

        engine.inner.sweep_once(t(9, 20)).await;
        engine.inner.sweep_once(t(9, 21)).await;

        let tasks = engine.inner.tasks.read().await;
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn refresh_instantiates_definitions_and_updates_titles() {
        let definition = TaskDefinition {
            id: "weekly-survey".to_string(),
            title: "Weekly survey".to_string(),
            description: "Tell us about your week".to_string(),
            schedule: Schedule::Recurring {
                first_at: Utc::now() + chrono::Duration::hours(1),
                every: std::time::Duration::from_secs(7 * 86_400),
            },
            window: std::time::Duration::from_secs(3600),
            required_data_types: vec!["HeartRate".to_string()],
        };
        let (engine, store) = engine_with(StubBackend::with(vec![definition.clone()])).await;

        engine.refresh().await.unwrap();

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].definition_id(), "weekly-survey");
        assert_eq!(tasks[0].state(), TaskState::Scheduled);

        // A second refresh with a renamed definition updates in place
        // instead of duplicating.
        let mut renamed = definition;
        renamed.title = "Weekly wellness survey".to_string();
        let engine2 = TaskLifecycleEngine::new(
            store.clone(),
            Arc::new(StubBackend::with(vec![renamed])),
            None,
            &EngineConfig::default(),
        )
        .await
        .unwrap();
        engine2.refresh().await.unwrap();

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title(), "Weekly wellness survey");
    }

    #[tokio::test]
    async fn today_partition_uses_window_intersection() {
        let (engine, _) = engine_with(StubBackend::empty()).await;

        // Spans the whole day.
        let spanning = active_survey(t(0, 0) - chrono::Duration::hours(2), t(23, 0));
        let spanning_id = spanning.id();
        // Entirely on another day.
        let other_day = StudyTask::new(
            "next-week",
            "Next week",
            "",
            Schedule::OneOff {
                at: t(9, 0) + chrono::Duration::days(6),
            },
            vec![],
            TimeRange::new(
                t(9, 0) + chrono::Duration::days(6),
                t(10, 0) + chrono::Duration::days(6),
            ),
        )
        .unwrap();
        let other_id = other_day.id();
        engine.add_task(spanning).await.unwrap();
        engine.add_task(other_day).await.unwrap();

        engine.inner.recompute_partitions(t(12, 0)).await;

        let today = engine.today_tasks().borrow().clone();
        assert!(today.iter().any(|t| t.id() == spanning_id));
        assert!(!today.iter().any(|t| t.id() == other_id));

        // No id appears twice within a partition.
        let mut ids: Vec<_> = today.iter().map(|t| t.id()).collect();
        ids.sort_by_key(|id| id.as_uuid());
        ids.dedup();
        assert_eq!(ids.len(), today.len());
    }

    #[tokio::test]
    async fn partitions_resume_from_store_on_restart() {
        let store = Arc::new(MemoryStore::new());
        let task = active_survey(Utc::now() - chrono::Duration::minutes(10), Utc::now() + chrono::Duration::minutes(50));
        let id = task.id();
        store.put_task(&task).await.unwrap();

        let engine = TaskLifecycleEngine::new(
            store,
            Arc::new(StubBackend::empty()),
            None,
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        assert!(engine
            .active_tasks()
            .borrow()
            .iter()
            .any(|t| t.id() == id));
    }
}
