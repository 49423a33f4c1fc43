use super::http::HttpConnector;
use super::types::{
    BackendConnector, BackendError, CreateEventRequest, CreateSpanRequest, CreateTraceRequest,
    Delivery, HealthStatus, ObservationUpdate, TelemetryBackend, TraceUpdate,
};
use crate::buffer::EventSink;
use crate::circuit_breaker::{BreakerOutcome, CircuitBreaker};
use crate::config::BackendConfig;
use crate::models::TraceEvent;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Client for the remote telemetry backend.
///
/// The transport is built on first use. Concurrent first calls share one
/// initialization. Without complete configuration every operation returns
/// [`Delivery::Disabled`]. Each call runs through the shared circuit breaker
/// and is bounded by `request_timeout_ms`.
pub struct TelemetryBackendClient {
    config: BackendConfig,
    connector: Arc<dyn BackendConnector>,
    backend: OnceCell<Option<Arc<dyn TelemetryBackend>>>,
    breaker: CircuitBreaker,
    health: RwLock<Option<HealthStatus>>,
}

impl TelemetryBackendClient {
    /// Client using the HTTP transport
    pub fn new(config: BackendConfig, breaker: CircuitBreaker) -> Self {
        Self::with_connector(config, breaker, Arc::new(HttpConnector))
    }

    pub fn with_connector(
        config: BackendConfig,
        breaker: CircuitBreaker,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        Self {
            config,
            connector,
            backend: OnceCell::new(),
            breaker,
            health: RwLock::new(None),
        }
    }

    /// Whether configuration allows delivery at all
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured() && !matches!(self.backend.get(), Some(None))
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn last_health(&self) -> Option<HealthStatus> {
        self.health.read().clone()
    }

    async fn backend(&self) -> Option<Arc<dyn TelemetryBackend>> {
        self.backend
            .get_or_init(|| async {
                if !self.config.is_configured() {
                    info!("Telemetry backend not configured, delivery disabled");
                    return None;
                }

                match self.connector.connect(&self.config).await {
                    Ok(backend) => {
                        info!(
                            endpoint = self.config.endpoint.as_deref().unwrap_or_default(),
                            "Telemetry backend initialized"
                        );
                        Some(backend)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to initialize telemetry backend, delivery disabled");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Delivery<T>
    where
        F: FnOnce(Arc<dyn TelemetryBackend>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let Some(backend) = self.backend().await else {
            return Delivery::Disabled;
        };

        let deadline = self.config.request_timeout();
        let result = self
            .breaker
            .execute(operation, || async move {
                match tokio::time::timeout(deadline, f(backend)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(deadline)),
                }
            })
            .await;

        match result {
            Ok(BreakerOutcome::Executed(value)) => Delivery::Delivered(value),
            Ok(BreakerOutcome::Skipped) => Delivery::Skipped,
            Err(e) => {
                warn!(operation, error = %e, "Telemetry backend call failed");
                Delivery::Failed(e)
            }
        }
    }

    pub async fn create_trace(&self, request: &CreateTraceRequest) -> Delivery<String> {
        let mut request = request.clone();
        if request.environment.is_none() {
            request.environment = self.config.environment.clone();
        }
        if request.release.is_none() {
            request.release = self.config.release.clone();
        }

        self.call("create_trace", |backend| async move {
            backend.create_trace(&request).await
        })
        .await
    }

    pub async fn create_span(&self, request: &CreateSpanRequest) -> Delivery<String> {
        self.call("create_span", |backend| async move { backend.create_span(request).await })
            .await
    }

    pub async fn create_event(&self, request: &CreateEventRequest) -> Delivery<String> {
        self.call("create_event", |backend| async move { backend.create_event(request).await })
            .await
    }

    pub async fn update_observation(&self, id: &str, update: &ObservationUpdate) -> Delivery<bool> {
        self.call("update_observation", |backend| async move {
            backend.update_observation(id, update).await
        })
        .await
    }

    pub async fn update_trace(&self, id: &str, update: &TraceUpdate) -> Delivery<bool> {
        self.call("update_trace", |backend| async move {
            backend.update_trace(id, update).await
        })
        .await
    }

    pub async fn flush(&self) -> Delivery<()> {
        self.call("flush", |backend| async move { backend.flush().await })
            .await
    }

    /// Create a synthetic trace and record latency and outcome.
    ///
    /// Never fails; the result is also kept for [`Self::last_health`].
    pub async fn health_check(&self) -> HealthStatus {
        let mut request = CreateTraceRequest::new(Uuid::new_v4().to_string(), "health_check");
        request.tags.push("health-check".to_string());

        let start = Instant::now();
        let delivery = self.create_trace(&request).await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (healthy, latency_ms, error) = match delivery {
            Delivery::Delivered(_) => (true, Some(latency_ms), None),
            Delivery::Disabled => (false, None, Some("backend disabled".to_string())),
            Delivery::Skipped => (false, None, Some("circuit breaker open".to_string())),
            Delivery::Failed(e) => (false, Some(latency_ms), Some(e.to_string())),
        };

        let status = HealthStatus {
            healthy,
            latency_ms,
            checked_at: Utc::now(),
            error,
            circuit_state: self.breaker.state(),
        };

        if status.healthy {
            debug!(latency_ms = ?status.latency_ms, "Telemetry backend healthy");
        } else {
            warn!(error = ?status.error, "Telemetry backend unhealthy");
        }

        *self.health.write() = Some(status.clone());
        status
    }

    fn event_request(event: &TraceEvent) -> CreateEventRequest {
        let status_message = match &event.error {
            Some(error) => Some(error.message.clone()),
            None => Some(event.message.clone()),
        };

        CreateEventRequest {
            id: event.id.to_string(),
            trace_id: event.context.trace_id.clone(),
            name: event.name.clone(),
            input: event.data.clone(),
            output: event
                .error
                .as_ref()
                .and_then(|error| serde_json::to_value(error).ok()),
            metadata: Some(event.backend_metadata()),
            level: Some(event.level.as_backend_level().to_string()),
            status_message,
            parent_span_id: event.context.span_id.clone(),
            start_time: event.timestamp,
        }
    }
}

#[async_trait]
impl EventSink for TelemetryBackendClient {
    async fn deliver(&self, event: &TraceEvent) -> Delivery<String> {
        self.create_event(&Self::event_request(event)).await
    }
}
