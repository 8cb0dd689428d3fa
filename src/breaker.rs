//! Circuit breaker registry: per-key CLOSED/OPEN/HALF_OPEN state machine
//! with windowed failure counting and FIFO-capped key tracking.
//!
//! Grounded directly on the teacher's `tools/circuit_breaker.rs`: same
//! state enum, same optimistic-read-then-upgrade locking shape, same
//! exponential backoff knobs layered under the base `reset_timeout`. The
//! legacy global (non-keyed) methods the teacher keeps for backwards
//! compatibility are not carried over — this crate has no prior API to
//! stay compatible with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub failure_window: Duration,
    pub max_breakers: usize,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(30_000),
            failure_window: Duration::from_millis(60_000),
            max_breakers: 500,
            max_backoff: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }
}

struct KeyState {
    status: CircuitState,
    failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    /// Current backoff for this key, widened exponentially across
    /// consecutive OPEN episodes and reset on a successful CLOSE. This is
    /// an internal refinement — the externally observed reset_timeout
    /// contract for a single episode is unchanged.
    current_backoff: Duration,
    open_count: u32,
    /// Whether the single HALF_OPEN probe has already been handed out.
    probe_issued: bool,
}

impl KeyState {
    fn new(base: Duration) -> Self {
        Self {
            status: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
            opened_at: None,
            current_backoff: base,
            open_count: 0,
            probe_issued: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerDiagnostics {
    pub key: String,
    pub state: CircuitState,
    pub failures: u32,
    pub open_count: u32,
    pub remaining_backoff_ms: Option<u64>,
}

pub struct CircuitBreakerRegistry {
    states: Arc<parking_lot::RwLock<HashMap<String, KeyState>>>,
    insertion_order: Arc<parking_lot::Mutex<Vec<String>>>,
    config: BreakerConfig,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            states: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            insertion_order: Arc::new(parking_lot::Mutex::new(Vec::new())),
            config,
            clock,
        }
    }

    fn evict_if_needed(&self, states: &mut HashMap<String, KeyState>) {
        if states.len() < self.config.max_breakers {
            return;
        }
        let mut order = self.insertion_order.lock();
        if let Some(oldest) = order.first().cloned() {
            order.remove(0);
            states.remove(&oldest);
            warn!(key = %oldest, "evicted oldest circuit breaker at capacity");
        }
    }

    fn ensure_key(&self, states: &mut HashMap<String, KeyState>, key: &str) {
        if !states.contains_key(key) {
            self.evict_if_needed(states);
            states.insert(key.to_string(), KeyState::new(self.config.reset_timeout));
            self.insertion_order.lock().push(key.to_string());
        }
    }

    /// Returns true if the call is admitted. Optimistic read first; only
    /// takes the write lock to perform the OPEN→HALF_OPEN transition.
    pub fn allow_request(&self, key: &str) -> bool {
        {
            let states = self.states.read();
            if let Some(state) = states.get(key) {
                match state.status {
                    CircuitState::Closed => return true,
                    CircuitState::HalfOpen => return false,
                    CircuitState::Open => {
                        let opened_at = state.opened_at.unwrap_or_else(|| self.clock.now());
                        if self.clock.now().duration_since(opened_at) < state.current_backoff {
                            return false;
                        }
                        // Falls through to the write path below to perform
                        // the transition and hand out the single probe.
                    }
                }
            } else {
                return true;
            }
        }

        let mut states = self.states.write();
        self.ensure_key(&mut states, key);
        let state = match states.get_mut(key) {
            Some(state) => state,
            None => return true,
        };
        if state.status != CircuitState::Open {
            return matches!(state.status, CircuitState::Closed);
        }
        let opened_at = state.opened_at.unwrap_or_else(|| self.clock.now());
        if self.clock.now().duration_since(opened_at) < state.current_backoff {
            return false;
        }
        if state.probe_issued {
            return false;
        }
        state.status = CircuitState::HalfOpen;
        state.probe_issued = true;
        debug!(key = %key, "circuit transitioned OPEN -> HALF_OPEN, probe issued");
        true
    }

    pub fn record_success(&self, key: &str) {
        let mut states = self.states.write();
        self.ensure_key(&mut states, key);
        if let Some(state) = states.get_mut(key) {
            state.failures = 0;
            state.status = CircuitState::Closed;
            state.probe_issued = false;
            state.current_backoff = self.config.reset_timeout;
        }
    }

    pub fn record_failure(&self, key: &str) {
        let now = self.clock.now();
        let mut states = self.states.write();
        self.ensure_key(&mut states, key);
        let Some(state) = states.get_mut(key) else {
            return;
        };

        match state.status {
            CircuitState::HalfOpen => {
                state.status = CircuitState::Open;
                state.opened_at = Some(now);
                state.probe_issued = false;
                state.open_count += 1;
                state.current_backoff = widen(state.current_backoff, &self.config);
                warn!(key = %key, "circuit reopened after failed probe");
            }
            CircuitState::Open => {
                // Shouldn't normally be recorded against an open breaker,
                // but keep the window fresh defensively.
                state.last_failure_at = Some(now);
            }
            CircuitState::Closed => {
                let window_expired = state
                    .last_failure_at
                    .map(|last| now.duration_since(last) > self.config.failure_window)
                    .unwrap_or(false);
                if window_expired {
                    state.failures = 1;
                } else {
                    state.failures += 1;
                }
                state.last_failure_at = Some(now);
                if state.failures >= self.config.failure_threshold {
                    state.status = CircuitState::Open;
                    state.opened_at = Some(now);
                    state.open_count += 1;
                    warn!(key = %key, failures = state.failures, "circuit opened");
                }
            }
        }
    }

    pub fn reset(&self, key: &str) {
        self.states.write().remove(key);
        self.insertion_order.lock().retain(|existing| existing != key);
    }

    pub fn reset_all(&self) {
        self.states.write().clear();
        self.insertion_order.lock().clear();
    }

    pub fn get_diagnostics(&self, key: &str) -> Option<BreakerDiagnostics> {
        let states = self.states.read();
        let state = states.get(key)?;
        Some(diagnostics_for(key, state, &self.clock))
    }

    pub fn get_all_diagnostics(&self) -> Vec<BreakerDiagnostics> {
        let states = self.states.read();
        states
            .iter()
            .map(|(key, state)| diagnostics_for(key, state, &self.clock))
            .collect()
    }

    pub fn open_circuit_count(&self) -> usize {
        self.states
            .read()
            .values()
            .filter(|state| state.status == CircuitState::Open)
            .count()
    }
}

fn widen(current: Duration, config: &BreakerConfig) -> Duration {
    let widened = current.mul_f64(config.backoff_factor);
    widened.min(config.max_backoff)
}

fn diagnostics_for(key: &str, state: &KeyState, clock: &SharedClock) -> BreakerDiagnostics {
    let remaining_backoff_ms = match (state.status, state.opened_at) {
        (CircuitState::Open, Some(opened_at)) => {
            let elapsed = clock.now().duration_since(opened_at);
            Some(state.current_backoff.saturating_sub(elapsed).as_millis() as u64)
        }
        _ => None,
    };
    BreakerDiagnostics {
        key: key.to_string(),
        state: state.status,
        failures: state.failures,
        open_count: state.open_count,
        remaining_backoff_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry_with_manual_clock() -> (CircuitBreakerRegistry, ManualClock) {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::new(BreakerConfig::default(), Arc::new(clock.clone()));
        (registry, clock)
    }

    #[test]
    fn opens_after_threshold_failures() {
        let (registry, _clock) = registry_with_manual_clock();
        for _ in 0..5 {
            assert!(registry.allow_request("t1"));
            registry.record_failure("t1");
        }
        assert!(!registry.allow_request("t1"));
    }

    #[test]
    fn half_open_admits_single_probe() {
        let (registry, clock) = registry_with_manual_clock();
        for _ in 0..5 {
            registry.record_failure("t1");
        }
        assert!(!registry.allow_request("t1"));
        clock.advance(Duration::from_millis(30_001));
        assert!(registry.allow_request("t1"));
        assert!(!registry.allow_request("t1"));
    }

    #[test]
    fn success_in_half_open_closes_circuit() {
        let (registry, clock) = registry_with_manual_clock();
        for _ in 0..5 {
            registry.record_failure("t1");
        }
        clock.advance(Duration::from_millis(30_001));
        assert!(registry.allow_request("t1"));
        registry.record_success("t1");
        assert!(registry.allow_request("t1"));
        assert!(registry.allow_request("t1"));
    }
}
