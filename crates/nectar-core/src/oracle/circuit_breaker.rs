//! Circuit breaker guarding calls to one upstream market data source.
//!
//! Three-state machine:
//! - `Closed` → `Open` when consecutive failures reach the threshold
//! - `Open` → `HalfOpen` when the cooldown elapses (one trial call admitted)
//! - `HalfOpen` → `Closed` on trial success, back to `Open` on trial failure
//!
//! All mutable state lives behind a single mutex, so concurrent snapshot
//! requests observe transitions atomically and cannot race a `Closed → Open`
//! transition into inconsistency.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Circuit breaker state, per upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failure threshold reached; calls short-circuit until the cooldown elapses.
    Open,
    /// Cooldown elapsed; exactly one trial call is admitted.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial call is in flight.
    trial_in_flight: bool,
}

/// Per-source circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `threshold` consecutive failures and
    /// admits a trial call after `cooldown` in the open state.
    #[must_use]
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Asks for admission of one call.
    ///
    /// Returns `true` when the circuit is closed, or when an elapsed cooldown
    /// lets this caller take the single half-open trial slot. Returns `false`
    /// while the circuit is open or another trial is already in flight.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed =
                    inner.opened_at.map(|at| at.elapsed() >= self.cooldown).unwrap_or(false);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::warn!("circuit breaker half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a successful call, closing the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Records a failed call. Opens the circuit at the threshold, and re-opens
    /// it immediately from a failed half-open trial.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                consecutive_failures = inner.consecutive_failures,
                threshold = self.threshold,
                "circuit breaker opened"
            );
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}
