//! Retry timing for connection attempts.
//!
//! The session retries a transient connection failure forever, waiting the
//! same interval before every attempt.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    interval: Duration,
}

impl Backoff {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }

    /// The wait before the next attempt. Never gives up.
    pub fn delay(&self) -> Duration {
        self.interval
    }
}

impl Default for Backoff {
    /// Ten seconds between attempts.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(10))
    }
}
