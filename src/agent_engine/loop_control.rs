// Retry policy for the task scheduler.
use std::time::Duration;

use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }

    /// Delay before retry `n` (1-based): `base * 2^(n-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Whether a task that has already been retried `retries` times may go again.
    pub fn allows_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}
