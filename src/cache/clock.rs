//! Time source for cache expiry.

use std::fmt;
use std::time::Instant;

/// Monotonic time source used to stamp and expire cache entries.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// The process clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: std::sync::Arc<parking_lot::Mutex<std::time::Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Default::default(),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        *self.offset.lock() += by;
    }

    /// Move to an absolute offset from the clock's creation.
    pub fn set(&self, at: std::time::Duration) {
        *self.offset.lock() = at;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
