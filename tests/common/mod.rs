//! Shared helpers for the pipeline and tracer suites

#![allow(dead_code)]

use agent_telemetry::backend::{BackendConnector, InMemoryBackend, StaticConnector};
use agent_telemetry::models::{ComponentKind, EventLevel, TraceContext, TraceEvent};
use agent_telemetry::{TelemetryConfig, TelemetryPipeline};
use std::sync::Arc;

/// Configuration with a (fake) configured backend and the flush timer off
pub fn test_config() -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.backend.endpoint = Some("memory://test".to_string());
    config.backend.public_key = Some("pk-test".to_string());
    config.backend.secret_key = Some("sk-test".to_string());
    config.backend.request_timeout_ms = 200;
    config.buffer.flush_interval_ms = 0;
    config
}

/// Pipeline delivering into a fresh in-memory backend
pub fn memory_pipeline(config: TelemetryConfig) -> (TelemetryPipeline, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let connector: Arc<dyn BackendConnector> = Arc::new(StaticConnector::new(backend.clone()));
    let pipeline = TelemetryPipeline::with_connector(config, connector).unwrap();
    (pipeline, backend)
}

pub fn event(trace_id: &str, name: &str) -> TraceEvent {
    TraceEvent::new(
        name,
        EventLevel::Info,
        ComponentKind::Tool,
        TraceContext::with_trace_id(trace_id),
        name,
    )
}
