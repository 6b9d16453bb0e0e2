//! Engine configuration.
//!
//! All configuration is supplied at process start and immutable afterwards;
//! there is no runtime reconfiguration surface. Scalar knobs can be
//! overridden via environment variables:
//! - `STUDYSYNC_SWEEP_INTERVAL_SECS` - Optional. Task sweep cadence. Defaults to `60`.
//! - `STUDYSYNC_UPLOAD_TIMEOUT_SECS` - Optional. Backend call timeout. Defaults to `30`.
//! - `STUDYSYNC_TZ_OFFSET_MINUTES` - Optional. Wall-clock offset for day
//!   comparisons. Defaults to `0` (UTC).

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::BackoffPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// How often one health data type is pulled from the device store and
/// pushed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSpec {
    /// Data type name as the health data source knows it (e.g. `"HeartRate"`).
    pub data_type: String,
    /// Cadence of the periodic pull-and-push for this type.
    pub interval: Duration,
}

impl SyncSpec {
    pub fn new(data_type: impl Into<String>, interval: Duration) -> Self {
        Self {
            data_type: data_type.into(),
            interval,
        }
    }
}

impl std::fmt::Display for SyncSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.interval.as_secs();
        if secs >= 3600 {
            write!(f, "{} every {} hours", self.data_type, secs / 3600)
        } else {
            write!(f, "{} every {} minutes", self.data_type, secs / 60)
        }
    }
}

/// What happens to a non-terminal task whose window fully elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedWindowPolicy {
    /// Move it to `Canceled` (missed), preserving the audit trail.
    #[default]
    Cancel,
    /// Leave it untouched; the hosting app applies its own policy.
    Keep,
}

/// What happens to collected answers when a flow traversal completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerRetention {
    /// Persist them keyed by flow id (eligibility answers stay auditable).
    #[default]
    Persist,
    /// Drop them once the flow is done.
    Discard,
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock offset used for "today" comparisons.
    pub timezone: FixedOffset,
    pub missed_window: MissedWindowPolicy,
    pub answer_retention: AnswerRetention,
    /// Cadence of the lifecycle engine's activation/expiry sweep.
    pub sweep_interval: Duration,
    /// Timeout applied to each backend call; a timeout counts as a
    /// transient delivery failure.
    pub upload_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Utc.fix(),
            missed_window: MissedWindowPolicy::default(),
            answer_retention: AnswerRetention::default(),
            sweep_interval: Duration::from_secs(60),
            upload_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, applying environment overrides to the scalar
    /// knobs.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` when an override fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("STUDYSYNC_SWEEP_INTERVAL_SECS") {
            let secs: u64 = raw.parse().map_err(|e| {
                ConfigError::InvalidValue("STUDYSYNC_SWEEP_INTERVAL_SECS".to_string(), format!("{e}"))
            })?;
            config.sweep_interval = Duration::from_secs(secs);
        }

        if let Ok(raw) = std::env::var("STUDYSYNC_UPLOAD_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|e| {
                ConfigError::InvalidValue("STUDYSYNC_UPLOAD_TIMEOUT_SECS".to_string(), format!("{e}"))
            })?;
            config.upload_timeout = Duration::from_secs(secs);
        }

        if let Ok(raw) = std::env::var("STUDYSYNC_TZ_OFFSET_MINUTES") {
            let minutes: i32 = raw.parse().map_err(|e| {
                ConfigError::InvalidValue("STUDYSYNC_TZ_OFFSET_MINUTES".to_string(), format!("{e}"))
            })?;
            config.timezone = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "STUDYSYNC_TZ_OFFSET_MINUTES".to_string(),
                    format!("{minutes} is out of range"),
                )
            })?;
        }

        Ok(config)
    }
}
