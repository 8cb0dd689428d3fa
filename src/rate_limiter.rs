//! Fixed-window rate limiter keyed by an arbitrary string (conventionally
//! `"subject:{id}:tool:{tid}"`).
//!
//! The teacher's `adaptive_rate_limiter.rs` implements a token-bucket with
//! priority weighting; this component keeps its structural idiom (a
//! `Mutex`-guarded per-key map) but implements the simpler fixed-window
//! admission contract spec.md §4.5 actually specifies, rather than porting
//! the token-bucket algorithm.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub requests: u32,
    pub period: Duration,
}

struct WindowState {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    windows: Arc<parking_lot::Mutex<HashMap<String, WindowState>>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            windows: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Returns `Ok(())` if admitted, `Err(retry_after)` otherwise.
    pub fn check_and_increment(&self, key: &str, spec: RateLimitWindow) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let state = windows.entry(key.to_string()).or_insert_with(|| WindowState {
            count: 0,
            reset_at: now + spec.period,
        });

        if now > state.reset_at {
            state.count = 1;
            state.reset_at = now + spec.period;
            return Ok(());
        }

        state.count += 1;
        if state.count <= spec.requests {
            Ok(())
        } else {
            Err(state.reset_at.saturating_duration_since(now))
        }
    }

    /// Periodic sweep: removes entries whose window has already lapsed.
    pub fn sweep(&self) {
        let now = self.clock.now();
        self.windows.lock().retain(|_, state| state.reset_at >= now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn admits_up_to_the_limit_then_denies() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(Arc::new(clock.clone()));
        let spec = RateLimitWindow {
            requests: 3,
            period: Duration::from_secs(60),
        };
        assert!(limiter.check_and_increment("k", spec).is_ok());
        assert!(limiter.check_and_increment("k", spec).is_ok());
        assert!(limiter.check_and_increment("k", spec).is_ok());
        assert!(limiter.check_and_increment("k", spec).is_err());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check_and_increment("k", spec).is_ok());
    }
}
