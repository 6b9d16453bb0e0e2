//! Health data synchronization.
//!
//! One worker per [`SyncSpec`](crate::config::SyncSpec) periodically moves
//! samples from the health data source to the study backend, advancing a
//! per-type [`SyncCursor`] watermark. Failed deliveries land in the
//! [`OfflineQueue`] and are replayed oldest-first under [`BackoffPolicy`].

pub mod backoff;
pub mod cursor;
pub mod queue;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use cursor::SyncCursor;
pub use queue::{OfflineQueue, QueuedUpload};
pub use scheduler::{SyncScheduler, SyncState, SyncStatus};
