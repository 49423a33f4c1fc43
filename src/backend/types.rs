use crate::circuit_breaker::CircuitBreakerState;
use crate::config::BackendConfig;
use crate::error::TelemetryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while talking to the telemetry backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Backend misconfigured: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Short machine-readable kind, used as the error kind when recorded
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Connection(_) => "BackendConnectionError",
            BackendError::Request(_) => "BackendRequestError",
            BackendError::Status { .. } => "BackendStatusError",
            BackendError::Timeout(_) => "BackendTimeout",
            BackendError::Serialization(_) => "BackendSerializationError",
            BackendError::Configuration(_) => "BackendConfigurationError",
        }
    }
}

impl From<BackendError> for TelemetryError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout(after) => {
                TelemetryError::Timeout(format!("backend call after {:?}", after))
            }
            BackendError::Serialization(msg) => TelemetryError::Serialization(msg),
            BackendError::Configuration(msg) => TelemetryError::Configuration(msg),
            other => TelemetryError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Outcome of one backend operation.
///
/// `Disabled` and `Skipped` are distinct from delivery so callers never
/// mistake a no-op for a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    /// Backend is not configured; nothing was sent
    Disabled,
    Delivered(T),
    /// Circuit breaker is open; nothing was sent
    Skipped,
    Failed(BackendError),
}

impl<T> Delivery<T> {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }

    pub fn delivered(self) -> Option<T> {
        match self {
            Delivery::Delivered(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BackendError> {
        match self {
            Delivery::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delivery<U> {
        match self {
            Delivery::Disabled => Delivery::Disabled,
            Delivery::Delivered(value) => Delivery::Delivered(f(value)),
            Delivery::Skipped => Delivery::Skipped,
            Delivery::Failed(e) => Delivery::Failed(e),
        }
    }

    /// Label used in logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Delivery::Disabled => "disabled",
            Delivery::Delivered(_) => "delivered",
            Delivery::Skipped => "skipped",
            Delivery::Failed(_) => "failed",
        }
    }
}

/// New trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTraceRequest {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CreateTraceRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            user_id: None,
            session_id: None,
            metadata: None,
            tags: Vec::new(),
            input: None,
            environment: None,
            release: None,
            timestamp: Utc::now(),
        }
    }
}

/// New span within a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpanRequest {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub start_time: DateTime<Utc>,
    #[serde(rename = "parentObservationId", skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl CreateSpanRequest {
    pub fn new(trace_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trace_id: trace_id.into(),
            name: name.into(),
            input: None,
            metadata: None,
            start_time: Utc::now(),
            parent_span_id: None,
        }
    }
}

/// Point-in-time event within a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Backend level (`DEBUG`, `DEFAULT`, `WARNING`, `ERROR`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(rename = "parentObservationId", skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub start_time: DateTime<Utc>,
}

impl CreateEventRequest {
    pub fn new(trace_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trace_id: trace_id.into(),
            name: name.into(),
            input: None,
            output: None,
            metadata: None,
            level: None,
            status_message: None,
            parent_span_id: None,
            start_time: Utc::now(),
        }
    }
}

/// Completion of a span (or any observation)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Completion of a trace: final output plus status metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Result of the latest health check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
    pub circuit_state: CircuitBreakerState,
}

/// Remote observability backend
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Create a trace; returns the backend trace id
    async fn create_trace(&self, request: &CreateTraceRequest) -> Result<String, BackendError>;

    /// Create a span; returns the backend span id
    async fn create_span(&self, request: &CreateSpanRequest) -> Result<String, BackendError>;

    /// Create an event; returns the backend event id
    async fn create_event(&self, request: &CreateEventRequest) -> Result<String, BackendError>;

    async fn update_observation(
        &self,
        id: &str,
        update: &ObservationUpdate,
    ) -> Result<bool, BackendError>;

    /// Attach the final output and status to an existing trace
    async fn update_trace(&self, id: &str, update: &TraceUpdate) -> Result<bool, BackendError>;

    /// Push anything the transport still holds
    async fn flush(&self) -> Result<(), BackendError>;
}

/// Builds a backend from configuration on first use
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn TelemetryBackend>, BackendError>;
}

/// Connector handing out an already-built backend
pub struct StaticConnector {
    backend: Arc<dyn TelemetryBackend>,
}

impl StaticConnector {
    pub fn new(backend: Arc<dyn TelemetryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BackendConnector for StaticConnector {
    async fn connect(&self, _config: &BackendConfig) -> Result<Arc<dyn TelemetryBackend>, BackendError> {
        Ok(Arc::clone(&self.backend))
    }
}
