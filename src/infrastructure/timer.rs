use std::time::Duration;

use crate::types::{
    RECONNECT_FACTOR, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY,
};

/// Exponential backoff with a ceiling and a bounded number of attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// `min(initial_delay * factor^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether another retry may be scheduled after `attempts` retries
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(RECONNECT_INITIAL_DELAY),
            factor: RECONNECT_FACTOR,
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY),
            max_attempts: RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// Timer for reconnection logic, counting attempts against a [`ReconnectPolicy`]
#[derive(Debug, Clone)]
pub struct Timer {
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Timer {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            attempts: 0,
            policy,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        !self.policy.allows(self.attempts)
    }

    /// Get the next delay duration, or `None` once the attempt budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
