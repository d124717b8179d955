//! Per-domain refresh gating.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A gate answering "may I refresh now?" for one domain (key-values,
/// feature flags, or secrets). Independent instances exist per domain.
#[derive(Debug)]
pub struct RefreshTimer {
    interval: Duration,
    next_allowed: Mutex<Instant>,
}

impl RefreshTimer {
    /// Construct a timer that is immediately ready to fire.
    ///
    /// # Panics
    /// Panics if `interval` is zero.
    pub fn new(interval: Duration) -> Self {
        assert!(interval > Duration::ZERO, "refresh interval must be > 0");
        Self {
            interval,
            next_allowed: Mutex::new(Instant::now()),
        }
    }

    /// True iff wall-clock has reached the next-allowed time.
    pub fn can_refresh(&self) -> bool {
        Instant::now() >= *self.next_allowed.lock().unwrap()
    }

    /// Push the next-allowed time to `now + interval`.
    pub fn reset(&self) {
        *self.next_allowed.lock().unwrap() = Instant::now() + self.interval;
    }
}
