use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::{MessageQueueConfig, RetryBackoffConfig};

/// Backoff applied before a timed-out or retryable stage is dispatched
/// again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryBackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryBackoffConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryBackoffConfig) -> Self {
        Self { config }
    }

    /// Delay after `attempt` (1-based): `base * multiplier^(attempt - 1)`,
    /// with symmetric jitter. The result stays between the base and max
    /// intervals.
    pub fn backoff(&self, attempt: u32) -> chrono::Duration {
        let base = self.config.base_interval_seconds as f64;
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = base * self.config.backoff_multiplier.powi(exponent);
        let max = self.config.max_interval_seconds as f64;
        let capped = delay.min(max);

        let jitter = if self.config.jitter_factor > 0.0 {
            capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };

        let seconds = (capped + jitter).min(max).max(base);
        chrono::Duration::milliseconds((seconds * 1000.0) as i64)
    }

    pub fn next_retry_time(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.backoff(attempt)
    }
}

/// Bounded exponential retry for task publishes
#[derive(Debug, Clone)]
pub struct PublishRetry {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl PublishRetry {
    pub fn from_config(config: &MessageQueueConfig) -> Self {
        Self {
            max_attempts: config.publish_max_attempts.max(1),
            base_delay: Duration::from_millis(config.publish_retry_base_ms),
            max_delay: Duration::from_millis(config.publish_retry_max_ms),
        }
    }

    /// Delay before publish attempt `attempt + 1`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}
