//! Prometheus metrics for circuit breakers.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "agent_telemetry";

/// Container for all circuit breaker metrics
pub struct CircuitBreakerMetrics {
    /// Current state (0=closed, 1=open, 2=half-open)
    pub state: GaugeVec,

    /// Calls routed through a breaker, by admission status (`allowed`/`skipped`)
    pub calls_total: CounterVec,

    pub successful_calls: CounterVec,

    pub failed_calls: CounterVec,

    /// Calls skipped because the circuit was open
    pub rejected_calls: CounterVec,

    /// Duration of admitted calls
    pub call_duration: HistogramVec,

    pub state_transitions: CounterVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    CounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        .unwrap_or_else(|e| panic!("invalid metric definition {name}: {e}"))
}

impl CircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            state: GaugeVec::new(
                Opts::new("circuit_breaker_state", "Current state of circuit breakers")
                    .namespace(NAMESPACE),
                &["name"],
            )
            .unwrap_or_else(|e| panic!("invalid metric definition circuit_breaker_state: {e}")),

            calls_total: counter(
                "circuit_breaker_calls_total",
                "Calls routed through circuit breakers",
                &["name", "status"],
            ),

            successful_calls: counter(
                "circuit_breaker_successful_calls_total",
                "Admitted calls that succeeded",
                &["name"],
            ),

            failed_calls: counter(
                "circuit_breaker_failed_calls_total",
                "Admitted calls that failed",
                &["name"],
            ),

            rejected_calls: counter(
                "circuit_breaker_skipped_calls_total",
                "Calls skipped while the circuit was open",
                &["name"],
            ),

            call_duration: HistogramVec::new(
                HistogramOpts::new(
                    "circuit_breaker_call_duration_seconds",
                    "Duration of calls admitted by circuit breakers",
                )
                .namespace(NAMESPACE)
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
                &["name"],
            )
            .unwrap_or_else(|e| {
                panic!("invalid metric definition circuit_breaker_call_duration_seconds: {e}")
            }),

            state_transitions: counter(
                "circuit_breaker_state_transitions_total",
                "State transitions by origin and destination state",
                &["name", "from_state", "to_state"],
            ),
        }
    }
}

lazy_static! {
    /// Process-wide circuit breaker metric families
    pub static ref CIRCUIT_BREAKER_METRICS: CircuitBreakerMetrics = CircuitBreakerMetrics::new();
}

/// Register circuit breaker metrics with the Prometheus registry
pub fn init_circuit_breaker_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    let m = &*CIRCUIT_BREAKER_METRICS;
    registry.register(Box::new(m.state.clone()))?;
    registry.register(Box::new(m.calls_total.clone()))?;
    registry.register(Box::new(m.successful_calls.clone()))?;
    registry.register(Box::new(m.failed_calls.clone()))?;
    registry.register(Box::new(m.rejected_calls.clone()))?;
    registry.register(Box::new(m.call_duration.clone()))?;
    registry.register(Box::new(m.state_transitions.clone()))?;

    tracing::debug!("Circuit breaker metrics registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_into_fresh_registry() {
        let registry = Registry::new();
        init_circuit_breaker_metrics(&registry).unwrap();
        // Registering the same families twice is rejected
        assert!(init_circuit_breaker_metrics(&registry).is_err());
    }

    #[test]
    fn test_record_state() {
        CIRCUIT_BREAKER_METRICS
            .state
            .with_label_values(&["metrics-test"])
            .set(2.0);

        let value = CIRCUIT_BREAKER_METRICS
            .state
            .with_label_values(&["metrics-test"])
            .get();
        assert_eq!(value, 2.0);
    }
}
