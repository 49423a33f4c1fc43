//! Async wrapper around the breaker state machine.

use crate::circuit_breaker::state::Admission;
use crate::circuit_breaker::{
    BreakerLedger, CircuitBreakerConfig, CircuitBreakerState, StateTransition,
    CIRCUIT_BREAKER_METRICS,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a call routed through the breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerOutcome<T> {
    /// The operation ran and returned this value
    Executed(T),
    /// The circuit was open; the operation was not invoked
    Skipped,
}

impl<T> BreakerOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, BreakerOutcome::Skipped)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            BreakerOutcome::Executed(value) => Some(value),
            BreakerOutcome::Skipped => None,
        }
    }
}

/// Shareable circuit breaker; clones observe the same state
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    ledger: Arc<Mutex<BreakerLedger>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(name = %name, config = ?config, "Circuit breaker created");

        Self {
            name,
            config,
            ledger: Arc::new(Mutex::new(BreakerLedger::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.ledger.lock().state()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// Returns `Ok(Skipped)` without invoking `operation` while the circuit
    /// is open. When the operation runs, its own error is returned unchanged
    /// after being counted.
    pub async fn execute<F, Fut, T, E>(&self, label: &str, operation: F) -> Result<BreakerOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = {
            let mut ledger = self.ledger.lock();
            let (admission, transition) = ledger.admit(
                self.config.recovery_timeout,
                self.config.half_open_max_requests,
            );
            self.report(transition);
            admission
        };

        let metrics = &*CIRCUIT_BREAKER_METRICS;
        if admission == Admission::Skip {
            metrics.calls_total.with_label_values(&[&self.name, "skipped"]).inc();
            metrics.rejected_calls.with_label_values(&[&self.name]).inc();
            debug!(name = %self.name, operation = label, "Circuit open, call skipped");
            return Ok(BreakerOutcome::Skipped);
        }
        metrics.calls_total.with_label_values(&[&self.name, "allowed"]).inc();

        let mut slot = ProbeSlot {
            ledger: &self.ledger,
            held: admission == Admission::Probe,
        };
        let started = Instant::now();
        let result = operation().await;
        slot.held = false;
        metrics
            .call_duration
            .with_label_values(&[&self.name])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                let transition = self.ledger.lock().succeed(admission);
                self.report(transition);
                metrics.successful_calls.with_label_values(&[&self.name]).inc();
                Ok(BreakerOutcome::Executed(value))
            }
            Err(err) => {
                let (failures, transition) = {
                    let mut ledger = self.ledger.lock();
                    let transition = ledger.fail(admission, self.config.failure_threshold);
                    (ledger.consecutive_failures(), transition)
                };
                warn!(
                    name = %self.name,
                    operation = label,
                    failures,
                    error = %err,
                    "Guarded call failed"
                );
                self.report(transition);
                metrics.failed_calls.with_label_values(&[&self.name]).inc();
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let ledger = self.ledger.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: ledger.state(),
            failures: ledger.consecutive_failures(),
            last_failure_at: ledger.last_failure_at(),
            transition_count: ledger.transition_count(),
            last_state_change: ledger.last_state_change(),
        }
    }

    /// Close the circuit and clear the failure count
    pub fn reset(&self) {
        let transition = self.ledger.lock().reset();
        self.report(transition);
    }

    /// Open the circuit now; the recovery timeout starts from this call
    pub fn force_open(&self) {
        let transition = self.ledger.lock().force_open();
        self.report(transition);
    }

    fn report(&self, transition: Option<StateTransition>) {
        let Some(transition) = transition else {
            return;
        };

        info!(
            name = %self.name,
            from = %transition.from,
            to = %transition.to,
            cause = %transition.cause,
            "Circuit breaker state changed"
        );

        let metrics = &*CIRCUIT_BREAKER_METRICS;
        metrics
            .state
            .with_label_values(&[&self.name])
            .set(transition.to.gauge_value());
        metrics
            .state_transitions
            .with_label_values(&[&self.name, &transition.from.to_string(), &transition.to.to_string()])
            .inc();
    }
}

/// Probe slot that is handed back if the guarded future is dropped mid-call
struct ProbeSlot<'a> {
    ledger: &'a Mutex<BreakerLedger>,
    held: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.ledger.lock().release_probe();
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitBreakerState,
    /// Consecutive failures
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub transition_count: u64,
    pub last_state_change: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failing() -> std::future::Ready<Result<i32, std::io::Error>> {
        std::future::ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")))
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_state() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_successful_call() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let result = breaker
            .execute("op", || async { Ok::<i32, std::io::Error>(42) })
            .await;

        assert_eq!(result.unwrap(), BreakerOutcome::Executed(42));
    }

    #[tokio::test]
    async fn test_failed_call_returns_operation_error() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let err = breaker.execute("op", failing).await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(breaker.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_without_invoking() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .build()
            .unwrap();
        let breaker = CircuitBreaker::new("test", config);

        for _ in 0..2 {
            let _ = breaker.execute("op", failing).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .execute("op", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, std::io::Error>(1)
            })
            .await
            .unwrap();

        assert!(result.is_skipped());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .build()
            .unwrap();
        let breaker = CircuitBreaker::new("test", config);

        let _ = breaker.execute("op", failing).await;
        let _ = breaker.execute("op", failing).await;
        let _ = breaker
            .execute("op", || async { Ok::<i32, std::io::Error>(0) })
            .await;
        let _ = breaker.execute("op", failing).await;

        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let breaker = CircuitBreaker::new("test", config);

        let _ = breaker.execute("op", failing).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = breaker.execute("op", failing).await;

        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_slow_call_from_closed_state_cannot_close_half_open() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let breaker = CircuitBreaker::new("test", config);

        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute("slow", || async {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok::<i32, std::io::Error>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = breaker.execute("op", failing).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let probe = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute("probe", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<i32, std::io::Error>(2)
                    })
                    .await
            })
        };

        // The slow call finishes while the probe is still running
        assert_eq!(slow.await.unwrap().unwrap(), BreakerOutcome::Executed(1));
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        assert_eq!(probe.await.unwrap().unwrap(), BreakerOutcome::Executed(2));
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .build()
            .unwrap();
        let breaker = CircuitBreaker::new("test", config);

        for _ in 0..2 {
            let _ = breaker.execute("op", failing).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.stats().failures, 0);
    }

    #[tokio::test]
    async fn test_force_open() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        breaker.force_open();

        let result = breaker
            .execute("op", || async { Ok::<i32, std::io::Error>(1) })
            .await
            .unwrap();
        assert!(result.is_skipped());
    }

    #[tokio::test]
    async fn test_stats() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let stats = breaker.stats();
        assert_eq!(stats.name, "test");
        assert_eq!(stats.state, CircuitBreakerState::Closed);
        assert_eq!(stats.failures, 0);
        assert!(stats.last_failure_at.is_none());
    }
}
