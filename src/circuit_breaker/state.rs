//! Breaker state machine, free of locking and I/O.
//!
//! [`BreakerLedger`] decides admissions and applies call outcomes; the async
//! wrapper in `core` only holds the lock and reports transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use strum::Display;

/// Position of the breaker in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CircuitBreakerState {
    /// Calls pass through; consecutive failures are counted
    Closed,
    /// Calls are skipped until the recovery timeout elapses
    Open,
    /// Probe calls decide between closing and re-opening
    HalfOpen,
}

impl CircuitBreakerState {
    /// Value exported on the state gauge
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitBreakerState::Closed => 0.0,
            CircuitBreakerState::Open => 1.0,
            CircuitBreakerState::HalfOpen => 2.0,
        }
    }
}

/// What moved the breaker from one state to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TransitionCause {
    ThresholdReached { failures: u32 },
    CooldownElapsed,
    ProbeSucceeded,
    ProbeFailed,
    Forced,
    Reset,
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::ThresholdReached { failures } => {
                write!(f, "{} consecutive failures", failures)
            }
            TransitionCause::CooldownElapsed => f.write_str("recovery timeout elapsed"),
            TransitionCause::ProbeSucceeded => f.write_str("probe succeeded"),
            TransitionCause::ProbeFailed => f.write_str("probe failed"),
            TransitionCause::Forced => f.write_str("forced open"),
            TransitionCause::Reset => f.write_str("manual reset"),
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

/// Whether a call may reach the wrapped operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Closed circuit
    Pass,
    /// Half-open probe holding one of the probe slots
    Probe,
    /// Open circuit, or every probe slot taken
    Skip,
}

/// Counters and timestamps behind one breaker
#[derive(Debug, Clone)]
pub struct BreakerLedger {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    /// Monotonic instant the cool-down is measured from
    opened_after: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    transition_count: u64,
    probes_in_flight: u32,
}

impl Default for BreakerLedger {
    fn default() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            opened_after: None,
            last_failure_at: None,
            last_state_change: Utc::now(),
            transition_count: 0,
            probes_in_flight: 0,
        }
    }
}

impl BreakerLedger {
    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.last_state_change
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Open and the recovery timeout has passed since the last failure
    pub fn cooldown_elapsed(&self, recovery_timeout: Duration) -> bool {
        self.state == CircuitBreakerState::Open
            && self
                .opened_after
                .map_or(true, |since| since.elapsed() >= recovery_timeout)
    }

    /// Admit or skip a call, moving Open to HalfOpen once the cool-down is over
    pub(crate) fn admit(
        &mut self,
        recovery_timeout: Duration,
        max_probes: u32,
    ) -> (Admission, Option<StateTransition>) {
        let transition = if self.cooldown_elapsed(recovery_timeout) {
            Some(self.enter(CircuitBreakerState::HalfOpen, TransitionCause::CooldownElapsed))
        } else {
            None
        };

        let admission = match self.state {
            CircuitBreakerState::Closed => Admission::Pass,
            CircuitBreakerState::Open => Admission::Skip,
            CircuitBreakerState::HalfOpen if self.probes_in_flight < max_probes => {
                self.probes_in_flight += 1;
                Admission::Probe
            }
            CircuitBreakerState::HalfOpen => Admission::Skip,
        };

        (admission, transition)
    }

    /// Apply a successful call admitted as `admission`.
    ///
    /// While half-open only a probe's outcome can close the circuit.
    pub(crate) fn succeed(&mut self, admission: Admission) -> Option<StateTransition> {
        match (self.state, admission) {
            (CircuitBreakerState::Closed, _) => {
                self.consecutive_failures = 0;
                None
            }
            (CircuitBreakerState::HalfOpen, Admission::Probe) => {
                Some(self.enter(CircuitBreakerState::Closed, TransitionCause::ProbeSucceeded))
            }
            // Admitted before the circuit opened; the cool-down stands
            _ => None,
        }
    }

    /// Apply a failed call admitted as `admission`
    pub(crate) fn fail(
        &mut self,
        admission: Admission,
        failure_threshold: u32,
    ) -> Option<StateTransition> {
        self.last_failure_at = Some(Utc::now());
        if self.state == CircuitBreakerState::HalfOpen && admission != Admission::Probe {
            return None;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.opened_after = Some(Instant::now());

        match self.state {
            CircuitBreakerState::Closed if self.consecutive_failures >= failure_threshold => {
                let cause = TransitionCause::ThresholdReached {
                    failures: self.consecutive_failures,
                };
                Some(self.enter(CircuitBreakerState::Open, cause))
            }
            CircuitBreakerState::HalfOpen => {
                Some(self.enter(CircuitBreakerState::Open, TransitionCause::ProbeFailed))
            }
            _ => None,
        }
    }

    /// Give back a probe slot whose call never reported an outcome
    pub(crate) fn release_probe(&mut self) {
        if self.state == CircuitBreakerState::HalfOpen {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }
    }

    /// Open immediately; the cool-down starts now
    pub(crate) fn force_open(&mut self) -> Option<StateTransition> {
        if self.state == CircuitBreakerState::Open {
            return None;
        }
        self.opened_after = Some(Instant::now());
        Some(self.enter(CircuitBreakerState::Open, TransitionCause::Forced))
    }

    /// Close with zero failures
    pub(crate) fn reset(&mut self) -> Option<StateTransition> {
        let transition = (self.state != CircuitBreakerState::Closed)
            .then(|| self.enter(CircuitBreakerState::Closed, TransitionCause::Reset));
        self.consecutive_failures = 0;
        transition
    }

    fn enter(&mut self, to: CircuitBreakerState, cause: TransitionCause) -> StateTransition {
        let transition = StateTransition {
            from: self.state,
            to,
            cause,
            at: Utc::now(),
        };

        self.state = to;
        self.last_state_change = transition.at;
        self.transition_count += 1;
        self.probes_in_flight = 0;
        if to != CircuitBreakerState::Open {
            self.consecutive_failures = 0;
        }

        transition
    }
}
