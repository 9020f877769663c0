//! Connect attempt policy.
//!
//! # Design Decisions
//! - A failed attempt waits out the remainder of its own timeout before the
//!   next one, never a fixed extra delay
//! - Worst case latency is therefore `timeout × attempts`

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ConnectConfig;

/// Per-attempt timeout and attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, attempts: u32) -> Self {
        Self { timeout, attempts }
    }

    pub fn from_config(config: &ConnectConfig) -> Self {
        Self::new(Duration::from_millis(config.timeout_ms), config.attempts)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Bound for one attempt's wait; a zero timeout means unbounded.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Upper bound on a whole connect call (unbounded timeouts excluded).
    pub fn max_total(&self) -> Duration {
        self.timeout.saturating_mul(self.attempts)
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.attempts
    }

    /// Part of the attempt timeout not yet used by an attempt begun at `started`.
    pub fn remaining(&self, started: Instant) -> Duration {
        self.timeout.saturating_sub(started.elapsed())
    }

    /// Sleep out the remainder of the attempt begun at `started`.
    pub async fn pause_after(&self, started: Instant) {
        let remaining = self.remaining(started);
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectConfig::default())
    }
}
