//! Retry policy: decides backoff delays.

use std::time::Duration;

use crate::config::QueueConfig;

/// Retry policy for failed dispatches.
///
/// delay = min(base_delay * multiplier^retry_count, max_delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 = doubling).
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    ///
    /// Example with base=1s, max=30s:
    /// - retry_count 0: 1s
    /// - retry_count 1: 2s
    /// - retry_count 2: 4s
    /// - retry_count 5: 30s (capped)
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let exp = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_delay),
            Duration::from_millis(config.max_retry_delay),
        )
    }
}
