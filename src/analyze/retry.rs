// src/analyze/retry.rs
use std::time::Duration;

use rand::Rng;

use crate::config::AiSettings;
use crate::error::TransportError;

/// Attempt budget and exponential backoff with full jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&AiSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(cfg: &AiSettings) -> Self {
        Self {
            max_attempts: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.base_delay_ms)),
        }
    }

    /// Whether `err` after attempt number `attempt` (1-based) earns another try.
    pub fn should_retry(&self, attempt: u32, err: &TransportError) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before the next attempt. `unit` in `[0, 1]` picks the point in the
    /// jitter window; a server `Retry-After` (capped at `max_delay`) is a floor.
    pub fn delay_with(&self, attempt: u32, err: &TransportError, unit: f64) -> Duration {
        let jittered = self.ceiling(attempt).mul_f64(unit.clamp(0.0, 1.0));
        match err.retry_after() {
            Some(ra) => jittered.max(ra.min(self.max_delay)),
            None => jittered,
        }
    }

    pub fn delay_for(&self, attempt: u32, err: &TransportError) -> Duration {
        let unit: f64 = rand::rng().random_range(0.0..=1.0);
        self.delay_with(attempt, err, unit)
    }
}
