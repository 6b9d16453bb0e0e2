//! Remote study backend abstraction.
//!
//! The research platform is reached only through [`BackendFacade`]. The wire
//! encoding belongs to the adapter implementing this trait; the core depends
//! on the contract alone: uploads are acknowledged or fail, and failures say
//! whether retrying can help.
//!
//! Delivery is at-least-once. A successful upload whose acknowledgment is
//! lost will be retried, so the backend must treat `(data_type, range)` as an
//! idempotency key and re-apply duplicates safely.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::{Sample, TimeRange};
use crate::task::Schedule;

/// A task description fetched from the study backend.
///
/// Definitions are stable across occurrences: a weekly survey keeps one
/// definition id while the lifecycle engine instantiates a fresh occurrence
/// per window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Stable identifier within the study configuration.
    pub id: String,
    pub title: String,
    pub description: String,
    pub schedule: Schedule,
    /// Length of each completion window, starting at the scheduled time.
    pub window: std::time::Duration,
    /// Health data types this task depends on (e.g. `"HeartRate"`).
    pub required_data_types: Vec<String>,
}

/// Errors reported by the study backend.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network or server trouble. Retried under the backoff policy.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend understood the request and refused it. Retrying the same
    /// payload cannot succeed.
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Unavailable(_))
    }
}

/// Remote study backend: accepts sample uploads, serves task definitions.
#[async_trait]
pub trait BackendFacade: Send + Sync {
    /// Deliver one batch of samples covering `range` for `data_type`.
    ///
    /// Returning `Ok(())` is the acknowledgment that lets the caller advance
    /// its watermark past `range`.
    async fn upload(
        &self,
        data_type: &str,
        range: TimeRange,
        samples: &[Sample],
    ) -> Result<(), DeliveryError>;

    /// Fetch the current set of task definitions for this participant.
    async fn fetch_tasks(&self) -> Result<Vec<TaskDefinition>, DeliveryError>;
}
