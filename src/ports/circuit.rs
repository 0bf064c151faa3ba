//! Per-adapter circuit breaker
//!
//! Closed -> (3 consecutive failures) -> Open -> (recovery window) ->
//! HalfOpen with a single in-flight probe -> Closed on success, back to
//! Open on failure. A timeout counts as a failure. Health is tracked per
//! adapter, independent of the others; the state is a small local counter
//! mutated only by the task that just completed a call to that adapter.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::constants::{CB_FAILURE_THRESHOLD, CB_RECOVERY_SECONDS};
use crate::metrics::BREAKER_TRANSITIONS_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    recovery: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_recovery(name, Duration::from_secs(CB_RECOVERY_SECONDS))
    }

    /// Shorter recovery window for tests
    pub fn with_recovery(name: &str, recovery: Duration) -> Self {
        Self {
            name: name.to_string(),
            recovery,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call would currently be allowed. Does not claim the
    /// half-open probe slot; use [`begin_call`] before dispatching.
    pub fn is_callable(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .opened_at
                .map(|t| t.elapsed() >= self.recovery)
                .unwrap_or(true),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Claim permission to dispatch one call. In the open state the first
    /// caller after the recovery window becomes the half-open probe;
    /// everyone else is refused until the probe resolves.
    pub fn begin_call(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.recovery)
                    .unwrap_or(true);
                if elapsed {
                    tracing::info!(port = %self.name, "circuit breaker half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    self.record_transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            tracing::info!(port = %self.name, "circuit breaker closing after successful probe");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            self.record_transition(CircuitState::Closed);
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= CB_FAILURE_THRESHOLD {
                    tracing::warn!(
                        port = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    self.record_transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(port = %self.name, "probe failed, circuit breaker reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                self.record_transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Reset to closed (test isolation)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn record_transition(&self, to: CircuitState) {
        BREAKER_TRANSITIONS_TOTAL
            .with_label_values(&[&self.name, &to.to_string()])
            .inc();
    }
}
