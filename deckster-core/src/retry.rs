//! Bounded retry policy shared by store creation and generation calls.
//!
//! Retries are an explicit loop with an attempt counter: callers ask the
//! policy for the delay before each follow-up attempt, so the budget and the
//! point of cancellation stay visible at the call site.

use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delays to sleep between attempts: `max_attempts - 1` values,
    /// doubling from `2 * base_delay_ms` and capped at `max_delay`.
    pub fn delays(&self) -> Vec<Duration> {
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms)
            .max_delay(self.max_delay);
        let take = (self.max_attempts - 1) as usize;
        if self.jitter {
            backoff.map(jitter).take(take).collect()
        } else {
            backoff.take(take).collect()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500)
    }
}
