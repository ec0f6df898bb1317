//! Exponential reconnect backoff with a ceiling.

use std::time::Duration;

/// Delay before the first retry.
pub const DEFAULT_BASE: Duration = Duration::from_secs(2);

/// Longest delay between retries.
pub const DEFAULT_CAP: Duration = Duration::from_secs(300);

/// Reconnect attempt counter producing `min(base * 2^attempts, cap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CAP)
    }
}

impl Backoff {
    /// Create a backoff with the given base delay and ceiling.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempts: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = 1u32
            .checked_shl(self.attempts)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap));
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Forget failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failures so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
