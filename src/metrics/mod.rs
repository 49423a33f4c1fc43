//! Prometheus self-metrics for the telemetry pipeline.
//!
//! The pipeline reports on itself here: events recorded and dropped, flush
//! batches, backend deliveries, errors recorded by the error store and the
//! number of executions currently traced. Circuit breaker families live in
//! [`crate::circuit_breaker`] and are registered alongside these.
//!
//! # Example
//! ```no_run
//! agent_telemetry::metrics::init_metrics().expect("metrics registration");
//! println!("{}", agent_telemetry::metrics::gather_metrics());
//! ```

use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

const NAMESPACE: &str = "agent_telemetry";

lazy_static! {
    /// Registry holding every pipeline metric family
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    static ref INITIALIZED: Mutex<bool> = Mutex::new(false);

    /// Events accepted by the buffer
    pub static ref EVENTS_RECORDED_TOTAL: Counter = Counter::with_opts(
        Opts::new("events_recorded_total", "Trace events accepted by the buffer")
            .namespace(NAMESPACE)
    ).expect("metric can be created");

    /// Events dropped before delivery
    ///
    /// Labels: reason (`buffer_full`, `closed`, `delivery_failed`, `skipped`, `disabled`)
    pub static ref EVENTS_DROPPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("events_dropped_total", "Trace events dropped before delivery")
            .namespace(NAMESPACE),
        &["reason"]
    ).expect("metric can be created");

    /// Events delivered to the backend
    pub static ref EVENTS_DELIVERED_TOTAL: Counter = Counter::with_opts(
        Opts::new("events_delivered_total", "Trace events delivered to the backend")
            .namespace(NAMESPACE)
    ).expect("metric can be created");

    /// Flushes performed
    ///
    /// Labels: trigger (`timer`, `buffer_full`, `manual`, `shutdown`)
    pub static ref FLUSHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("flushes_total", "Buffer flushes by trigger")
            .namespace(NAMESPACE),
        &["trigger"]
    ).expect("metric can be created");

    /// Flush duration
    pub static ref FLUSH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("flush_duration_seconds", "Time spent delivering one flush")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0])
    ).expect("metric can be created");

    /// Errors recorded by the error store
    ///
    /// Labels: component, severity
    pub static ref ERRORS_RECORDED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("errors_recorded_total", "Errors recorded by the error store")
            .namespace(NAMESPACE),
        &["component", "severity"]
    ).expect("metric can be created");

    /// Executions currently being traced
    pub static ref ACTIVE_EXECUTIONS: Gauge = Gauge::with_opts(
        Opts::new("active_executions", "Units of work currently being traced")
            .namespace(NAMESPACE)
    ).expect("metric can be created");
}

/// Register all pipeline and circuit breaker metrics.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let mut initialized = INITIALIZED.lock();
    if *initialized {
        return Ok(());
    }

    PROMETHEUS_REGISTRY.register(Box::new(EVENTS_RECORDED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(EVENTS_DROPPED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(EVENTS_DELIVERED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(FLUSHES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(FLUSH_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ERRORS_RECORDED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ACTIVE_EXECUTIONS.clone()))?;

    crate::circuit_breaker::init_circuit_breaker_metrics(&PROMETHEUS_REGISTRY)?;

    *initialized = true;
    tracing::info!("Telemetry pipeline metrics initialized");
    Ok(())
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_gather_includes_pipeline_families() {
        init_metrics().unwrap();
        EVENTS_RECORDED_TOTAL.inc();
        EVENTS_DROPPED_TOTAL.with_label_values(&["buffer_full"]).inc();

        let output = gather_metrics();
        assert!(output.contains("agent_telemetry_events_recorded_total"));
        assert!(output.contains("agent_telemetry_events_dropped_total"));
    }
}
