//! Process-wide composition root.
//!
//! Build one [`TelemetryPipeline`] at startup, hand out its components by
//! reference, and call [`TelemetryPipeline::shutdown`] once at teardown.

use crate::backend::{
    BackendConnector, Delivery, HttpConnector, TelemetryBackendClient,
};
use crate::buffer::{EventBuffer, EventSink, FlushReport};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::error_store::ErrorStore;
use crate::tracer::ExecutionTracer;
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the circuit breaker guarding the backend
pub const BACKEND_BREAKER_NAME: &str = "telemetry-backend";

/// All pipeline components, constructed once
pub struct TelemetryPipeline {
    config: Arc<TelemetryConfig>,
    client: Arc<TelemetryBackendClient>,
    error_store: Arc<ErrorStore>,
    buffer: Arc<EventBuffer>,
    tracer: ExecutionTracer,
}

impl TelemetryPipeline {
    /// Start the pipeline with the HTTP backend. Must be called inside a
    /// Tokio runtime.
    pub fn start(config: TelemetryConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(HttpConnector))
    }

    /// Start the pipeline against any backend transport
    pub fn with_connector(config: TelemetryConfig, connector: Arc<dyn BackendConnector>) -> Result<Self> {
        config.check()?;
        if config.observability.prometheus_enabled {
            crate::metrics::init_metrics()?;
        }

        let config = Arc::new(config);
        let breaker = CircuitBreaker::new(
            BACKEND_BREAKER_NAME,
            CircuitBreakerConfig::try_from(&config.circuit_breaker)?,
        );
        let client = Arc::new(TelemetryBackendClient::with_connector(
            config.backend.clone(),
            breaker,
            connector,
        ));
        let error_store = Arc::new(ErrorStore::new(config.error_store.clone()));

        let sink: Arc<dyn EventSink> = client.clone();
        let buffer = Arc::new(EventBuffer::start(
            config.buffer.clone(),
            sink,
            Arc::clone(&error_store),
        ));

        let tracer = ExecutionTracer::new(
            Arc::clone(&config),
            Arc::clone(&client),
            Arc::clone(&buffer),
            Arc::clone(&error_store),
        );

        info!(
            service = %config.observability.service_name,
            tracing_enabled = config.tracing.enabled,
            backend_configured = config.backend.is_configured(),
            "Telemetry pipeline started"
        );

        Ok(Self {
            config,
            client,
            error_store,
            buffer,
            tracer,
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn tracer(&self) -> &ExecutionTracer {
        &self.tracer
    }

    pub fn client(&self) -> &Arc<TelemetryBackendClient> {
        &self.client
    }

    pub fn error_store(&self) -> &Arc<ErrorStore> {
        &self.error_store
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Flush the buffer, stop the flusher, then flush the backend
    pub async fn shutdown(&self) -> Result<FlushReport> {
        let report = self.buffer.shutdown().await?;

        match self.client.flush().await {
            Delivery::Failed(e) => warn!(error = %e, "Final backend flush failed"),
            delivery => info!(outcome = delivery.outcome(), "Final backend flush"),
        }

        info!(
            events = report.events,
            delivered = report.delivered,
            failed = report.failed,
            "Telemetry pipeline stopped"
        );
        Ok(report)
    }
}
