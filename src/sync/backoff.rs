//! Retry backoff for sample delivery.

use std::time::Duration;

/// Exponential backoff with a capped ceiling and a maximum attempt count.
///
/// After `max_attempts` failed deliveries a range is marked failed and
/// surfaced through the sync status instead of being retried forever, so a
/// permanently unreachable backend cannot consume resources unboundedly.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Ceiling for the computed delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure (typically 2.0).
    pub multiplier: f64,
    /// Attempts after which a range is marked failed.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            max_attempts: 8,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many have already failed.
    ///
    /// `base * multiplier^(attempts-1)`, capped at `max_delay`. `attempts`
    /// counts failures so far and is at least 1 when this is consulted.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
