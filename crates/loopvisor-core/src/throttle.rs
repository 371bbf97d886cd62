//! Minimum iteration duration
//!
//! A throttle, not a deadline: an iteration that runs long is never cut
//! short, and one that finishes early is padded with a sleep.

use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationThrottle {
    minimum: Duration,
}

impl IterationThrottle {
    pub const fn new(minimum: Duration) -> Self {
        Self { minimum }
    }

    #[inline]
    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    /// Time left to pad after an iteration that took `elapsed`
    #[inline]
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.minimum.saturating_sub(elapsed)
    }

    /// Sleep out the remainder of the pass that began at `pass_start`.
    ///
    /// Returns the time slept.
    pub fn pace(&self, pass_start: Instant) -> Duration {
        let idle = self.remaining(pass_start.elapsed());
        if !idle.is_zero() {
            thread::sleep(idle);
        }
        idle
    }
}
