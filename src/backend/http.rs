//! Batch-ingestion HTTP transport.
//!
//! Every operation is sent as a single-item batch to
//! `POST {endpoint}/api/public/ingestion` with basic auth
//! (`public_key:secret_key`).

use super::types::{
    BackendConnector, BackendError, CreateEventRequest, CreateSpanRequest, CreateTraceRequest,
    ObservationUpdate, TelemetryBackend, TraceUpdate,
};
use crate::config::BackendConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const INGESTION_PATH: &str = "/api/public/ingestion";

#[derive(Debug, Serialize)]
struct IngestionBatch<'a> {
    batch: [IngestionEvent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct IngestionEvent<'a> {
    id: String,
    #[serde(rename = "type")]
    event_type: &'a str,
    timestamp: String,
    body: Value,
}

#[derive(Debug, Default, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionError>,
}

#[derive(Debug, Deserialize)]
struct IngestionError {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP backend speaking the batch-ingestion API
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    ingestion_url: String,
    public_key: String,
    secret_key: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Build from configuration; fails if endpoint or keys are missing
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let (endpoint, public_key, secret_key) = match (
            config.endpoint.as_deref(),
            config.public_key.as_deref(),
            config.secret_key.as_deref(),
        ) {
            (Some(e), Some(p), Some(s)) if config.is_configured() => (e, p, s),
            _ => {
                return Err(BackendError::Configuration(
                    "endpoint, public_key and secret_key are required".to_string(),
                ))
            }
        };

        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            ingestion_url: format!("{}{}", endpoint.trim_end_matches('/'), INGESTION_PATH),
            public_key: public_key.to_string(),
            secret_key: secret_key.to_string(),
            timeout,
        })
    }

    pub fn ingestion_url(&self) -> &str {
        &self.ingestion_url
    }

    async fn ingest<B: Serialize>(&self, event_type: &str, body: &B) -> Result<(), BackendError> {
        let payload = IngestionBatch {
            batch: [IngestionEvent {
                id: Uuid::new_v4().to_string(),
                event_type,
                timestamp: Utc::now().to_rfc3339(),
                body: serde_json::to_value(body)?,
            }],
        };

        let response = self
            .client
            .post(&self.ingestion_url)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        // 207 carries per-item results
        if status == StatusCode::MULTI_STATUS {
            let parsed: IngestionResponse = serde_json::from_str(&text).unwrap_or_default();
            if let Some(error) = parsed.errors.into_iter().next() {
                return Err(BackendError::Status {
                    status: error.status,
                    body: error.message.unwrap_or_default(),
                });
            }
        }

        debug!(event_type, status = status.as_u16(), "Ingestion accepted");
        Ok(())
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if e.is_connect() {
            BackendError::Connection(e.to_string())
        } else {
            BackendError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl TelemetryBackend for HttpBackend {
    async fn create_trace(&self, request: &CreateTraceRequest) -> Result<String, BackendError> {
        self.ingest("trace-create", request).await?;
        Ok(request.id.clone())
    }

    async fn create_span(&self, request: &CreateSpanRequest) -> Result<String, BackendError> {
        self.ingest("span-create", request).await?;
        Ok(request.id.clone())
    }

    async fn create_event(&self, request: &CreateEventRequest) -> Result<String, BackendError> {
        self.ingest("event-create", request).await?;
        Ok(request.id.clone())
    }

    async fn update_observation(
        &self,
        id: &str,
        update: &ObservationUpdate,
    ) -> Result<bool, BackendError> {
        let mut body = serde_json::to_value(update)?;
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.ingest("span-update", &body).await?;
        Ok(true)
    }

    async fn update_trace(&self, id: &str, update: &TraceUpdate) -> Result<bool, BackendError> {
        // trace-create upserts by id
        let mut body = serde_json::to_value(update)?;
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.ingest("trace-create", &body).await?;
        Ok(true)
    }

    async fn flush(&self) -> Result<(), BackendError> {
        // Every call is sent immediately; nothing is held locally
        Ok(())
    }
}

/// Connects [`HttpBackend`] from configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl BackendConnector for HttpConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn TelemetryBackend>, BackendError> {
        Ok(Arc::new(HttpBackend::new(config)?))
    }
}
