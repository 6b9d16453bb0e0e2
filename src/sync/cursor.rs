//! Per-data-type synchronization cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::TimeRange;

/// Watermark for one data type: the boundary up to which samples are
/// confirmed delivered to the backend, plus the range currently being
/// uploaded, if any.
///
/// The sync scheduler is the only writer. The watermark never decreases and
/// never passes a range whose upload has not been acknowledged; persisting
/// the cursor lets a restart resume where delivery left off instead of
/// re-uploading from the beginning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    data_type: String,
    watermark: DateTime<Utc>,
    in_flight: Option<TimeRange>,
}

impl SyncCursor {
    pub fn new(data_type: impl Into<String>, watermark: DateTime<Utc>) -> Self {
        Self {
            data_type: data_type.into(),
            watermark,
            in_flight: None,
        }
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn in_flight(&self) -> Option<TimeRange> {
        self.in_flight
    }

    /// Move the watermark forward. Attempts to move it backwards are
    /// ignored, keeping the watermark non-decreasing under replays.
    pub fn advance_to(&mut self, to: DateTime<Utc>) {
        if to > self.watermark {
            self.watermark = to;
        }
    }

    /// Mark `range` as being uploaded.
    pub fn begin_upload(&mut self, range: TimeRange) {
        self.in_flight = Some(range);
    }

    /// The upload was acknowledged: clear the in-flight marker and advance
    /// the watermark to the end of the delivered range.
    pub fn complete_upload(&mut self) {
        if let Some(range) = self.in_flight.take() {
            self.advance_to(range.end);
        }
    }

    /// The upload failed or was abandoned: the range stays undelivered and
    /// the watermark stays put.
    pub fn abort_upload(&mut self) {
        self.in_flight = None;
    }
}
