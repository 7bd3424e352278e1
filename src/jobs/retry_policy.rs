//! Retry policy for failed processing attempts.
//!
//! Fixed delay by default; a multiplier above 1.0 turns it into capped
//! exponential backoff.

use crate::config::JobSettings;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in seconds.
    pub retry_delay_secs: u64,
    /// Upper bound for any single delay, in seconds.
    pub max_retry_delay_secs: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &JobSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay_secs: settings.retry_delay_secs,
            max_retry_delay_secs: settings.max_retry_delay_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Total number of attempts a job may get (first attempt plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt follows a failure of attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Delay to wait after attempt number `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.retry_delay_secs as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_retry_delay_secs as f64).max(0.0);
        Duration::try_from_secs_f64(capped)
            .unwrap_or_else(|_| Duration::from_secs(self.max_retry_delay_secs))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&JobSettings::default())
    }
}
