//! Monotonic time source used throughout the runtime for TTLs, rate-limit
//! windows, and breaker timers.
//!
//! Every component takes a `Clock` rather than calling `Instant::now()`
//! directly so tests can drive time deterministically instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Anything that can report "now" as a monotonic instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The production clock: a thin wrapper over `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock tests can advance by hand, avoiding real sleeps in property tests
/// that exercise TTL/backoff/window boundaries.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<parking_lot::Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.inner.lock();
        *guard += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.inner.lock()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
