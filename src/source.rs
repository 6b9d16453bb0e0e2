//! Health data source abstraction.
//!
//! The platform health store (Health Connect, HealthKit, a watch SDK) is
//! wrapped behind [`HealthDataSource`] and injected into the sync scheduler
//! at construction. The core never talks to a platform API directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A half-open time interval `[start, end)`.
///
/// All sample windows, task windows, and upload batches in this crate are
/// expressed as half-open ranges so adjacent windows never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// An empty range covers no instant and is skipped by the scheduler.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// One measurement read from the health data source.
///
/// The payload is display/analysis data owned by the layers above; the core
/// only moves it between the source and the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the measurement was taken.
    pub timestamp: DateTime<Utc>,
    /// Opaque measurement content (e.g. `{"bpm": 72}`).
    pub payload: serde_json::Value,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self { timestamp, payload }
    }
}

/// Errors reported by a health data source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The underlying platform store could not be reached. Transient; the
    /// scheduler leaves the watermark untouched and retries on its cadence.
    #[error("health data source unavailable: {0}")]
    Unavailable(String),

    /// The data type is not provided by this source.
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
}

/// Supplier of time-ranged samples for named data types.
///
/// `query` is finite and one-shot per call: it returns every sample whose
/// timestamp falls inside `range` that the source knows about at call time.
/// An empty result is not an error.
#[async_trait]
pub trait HealthDataSource: Send + Sync {
    async fn query(&self, data_type: &str, range: TimeRange) -> Result<Vec<Sample>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let range = TimeRange::new(start, end);

        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(!range.is_empty());
    }

    #[test]
    fn degenerate_range_is_empty() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert!(TimeRange::new(at, at).is_empty());
        assert!(TimeRange::new(at + chrono::Duration::minutes(1), at).is_empty());
    }
}
