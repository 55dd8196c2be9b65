//! Exponential backoff for reconnect attempts.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Attempt counter plus the delay for the next attempt.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    policy: ReconnectConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectConfig) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Count one more attempt and return how long to wait before making it,
    /// or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let doublings = self.attempts.min(32);
        self.attempts += 1;
        let ms = self
            .policy
            .base_delay_ms
            .saturating_mul(1u64 << doublings)
            .min(self.policy.max_delay_ms);
        Some(Duration::from_millis(ms))
    }
}
