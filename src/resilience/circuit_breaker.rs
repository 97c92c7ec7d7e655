//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold (consecutive)
//! Open → Half-Open: first availability check after reset_timeout
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any failure (fresh window)
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream, shared via `Arc` and passed explicitly
//! - All fields live behind one mutex so transitions are never observed halfway
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open: one trial in flight until it reports back

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time copy of the breaker's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub open_until: Option<Instant>,
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    open_until: Option<Instant>,
    /// Ticket of the Half-Open trial currently admitted, if any.
    trial: Option<u64>,
    next_ticket: u64,
}

/// Circuit breaker guarding a single upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

/// Admission to call the upstream, returned by [`CircuitBreaker::try_acquire`].
///
/// Dropping a permit without a verdict frees the Half-Open trial slot it
/// holds, so a cancelled or neutral (4xx) trial never wedges the breaker.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl CallPermit<'_> {
    /// Whether this call is the Half-Open probe.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn success(mut self) {
        let trial = self.trial.take();
        self.breaker.settle_success(Reporter::Permit(trial));
    }

    pub fn failure(mut self) {
        self.trial = None;
        self.breaker.record_failure();
    }
}

/// Source of a success verdict.
#[derive(Debug, Clone, Copy)]
enum Reporter {
    /// A bare `record_success` after `is_available`.
    Direct,
    /// A permit, with its trial ticket if it was admitted as one.
    Permit(Option<u64>),
}

impl Reporter {
    fn owns_trial(self, current: Option<u64>) -> bool {
        match self {
            Reporter::Direct => true,
            Reporter::Permit(ticket) => ticket.is_some() && ticket == current,
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.trial.take() {
            self.breaker.release_trial(ticket);
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                open_until: None,
                trial: None,
                next_ticket: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may proceed right now.
    ///
    /// An elapsed Open window moves the breaker to Half-Open and admits the
    /// caller as the trial. While that trial is outstanding, further checks
    /// return false. A caller admitted this way must report a verdict.
    pub fn is_available(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`is_available`](Self::is_available), but hands back a permit that
    /// releases the trial slot on drop.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.admit().map(|trial| CallPermit {
            breaker: self,
            trial,
        })
    }

    /// `None` = rejected, `Some(None)` = normal admission, `Some(Some(t))` = trial `t`.
    fn admit(&self) -> Option<Option<u64>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => {
                let elapsed = inner.open_until.map_or(true, |until| Instant::now() >= until);
                if !elapsed {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.open_until = None;
                let ticket = Self::issue_trial(&mut inner);
                drop(inner);

                tracing::info!(state = "half_open", "Circuit breaker admitting trial request");
                metrics::record_circuit_transition(CircuitState::HalfOpen);
                Some(Some(ticket))
            }
            CircuitState::HalfOpen => {
                if inner.trial.is_some() {
                    None
                } else {
                    Some(Some(Self::issue_trial(&mut inner)))
                }
            }
        }
    }

    fn issue_trial(inner: &mut Inner) -> u64 {
        let ticket = inner.next_ticket;
        inner.next_ticket = inner.next_ticket.wrapping_add(1);
        inner.trial = Some(ticket);
        ticket
    }

    pub fn record_success(&self) {
        self.settle_success(Reporter::Direct);
    }

    fn settle_success(&self, reporter: Reporter) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // Calls admitted before the trip say nothing about recovery.
            CircuitState::HalfOpen if !reporter.owns_trial(inner.trial) => {
                tracing::debug!("Ignoring success from a call admitted before the trial");
            }
            CircuitState::HalfOpen => {
                inner.trial = None;
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.open_until = None;
                    drop(inner);

                    tracing::info!(state = "closed", "Circuit breaker closed after successful trial");
                    metrics::record_circuit_transition(CircuitState::Closed);
                }
            }
            // A late success from a call admitted before the trip.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    let failures = inner.failure_count;
                    self.trip(&mut inner);
                    drop(inner);

                    tracing::warn!(
                        state = "open",
                        failures,
                        reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                    metrics::record_circuit_transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.trip(&mut inner);
                drop(inner);

                tracing::warn!(state = "open", "Circuit breaker re-opened after failed trial");
                metrics::record_circuit_transition(CircuitState::Open);
            }
            CircuitState::Open => {
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.trial = None;
        inner.open_until = Some(Instant::now() + self.reset_timeout);
    }

    fn release_trial(&self, ticket: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial == Some(ticket) {
            inner.trial = None;
            tracing::debug!("Circuit breaker trial released without verdict");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            open_until: inner.open_until,
            trial_in_flight: inner.trial.is_some(),
        }
    }

    /// Time left in the current Open window, if the circuit is open.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.open_until) {
            (CircuitState::Open, Some(until)) => {
                Some(until.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }
}
