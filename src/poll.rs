//! Bounded polling parameters.

use std::time::Duration;

/// A fixed number of attempts at a fixed interval. No backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Poll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Poll {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on the time spent waiting, for error messages.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }

    /// `attempts` tries without sleeping in between.
    #[cfg(test)]
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }
}
