use std::time::Duration;

use murmur_shared::constants::{
    DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_RECONNECT_MAX_MS,
};

/// Bounded exponential backoff for channel reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Retries allowed before giving up.
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}
