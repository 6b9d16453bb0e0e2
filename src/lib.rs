//! # studysync
//!
//! Task lifecycle and health-data synchronization core for participant-facing
//! study apps.
//!
//! This library provides:
//! - A task lifecycle engine with reactive `active`/`today`/`completed`
//!   partitions over study tasks
//! - A step-sequence engine for multi-step onboarding/sign-up flows with
//!   validated branching
//! - A per-data-type sync scheduler moving wearable samples to the study
//!   backend with offline queueing and at-least-once delivery
//!
//! ## Architecture
//!
//! ```text
//!   HealthDataSource ──┐
//!                      ▼
//!              ┌──────────────┐   upload    ┌───────────────┐
//!              │ SyncScheduler├────────────►│ BackendFacade │
//!              │  + OfflineQ  │◄────────────┤  (remote)     │
//!              └──────┬───────┘  fetchTasks └───────────────┘
//!                     │ kick                        ▲
//!              ┌──────┴────────────┐               │
//!              │ TaskLifecycleEngine├──────────────┘
//!              └──────┬────────────┘
//!                     ▼ watch channels
//!              active / today / completed
//! ```
//!
//! All durable state (tasks, answers, cursors, queued uploads) lives behind
//! [`store::LocalStore`]; collaborators are injected as `Arc<dyn …>` at
//! construction, so the hosting app owns wiring and lifecycle.
//!
//! ## Modules
//! - `task`: task model and lifecycle engine
//! - `flow`: step flows and traversals
//! - `sync`: sync scheduler, cursors, offline queue, backoff
//! - `store`: pluggable local persistence (memory, sqlite)
//! - `source` / `backend`: the injected platform seams

pub mod backend;
pub mod config;
pub mod flow;
pub mod source;
pub mod store;
pub mod sync;
pub mod task;

pub use backend::{BackendFacade, DeliveryError, TaskDefinition};
pub use config::{AnswerRetention, EngineConfig, MissedWindowPolicy, SyncSpec};
pub use flow::{FlowError, FlowTraversal, StepFlow};
pub use source::{HealthDataSource, Sample, SourceError, TimeRange};
pub use store::{create_store, LocalStore, MemoryStore, SqliteStore, StoreError, StoreKind};
pub use sync::{BackoffPolicy, SyncScheduler, SyncState, SyncStatus};
pub use task::{Schedule, StudyTask, TaskError, TaskId, TaskLifecycleEngine, TaskState};
