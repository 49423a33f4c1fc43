use crate::error::{Result, TelemetryError};
use crate::models::ComponentKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main telemetry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TelemetryConfig {
    /// Tracing enablement
    #[serde(default)]
    #[validate(nested)]
    pub tracing: TracingConfig,

    /// Payload capture and redaction
    #[serde(default)]
    #[validate(nested)]
    pub capture: CaptureConfig,

    /// Event buffering
    #[serde(default)]
    #[validate(nested)]
    pub buffer: BufferConfig,

    /// Circuit breaker guarding the backend
    #[serde(default)]
    #[validate(nested)]
    pub circuit_breaker: BreakerSettings,

    /// Remote backend connection
    #[serde(default)]
    #[validate(nested)]
    pub backend: BackendConfig,

    /// Local error store
    #[serde(default)]
    #[validate(nested)]
    pub error_store: ErrorStoreConfig,

    /// Self-observability
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl TelemetryConfig {
    /// Load configuration from the embedded defaults, an optional file and the environment
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("AGENT_TELEMETRY_CONFIG")
            .unwrap_or_else(|_| "config/agent-telemetry.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration using an explicit override file path
    pub fn load_from(config_path: &str) -> Result<Self> {
        let config: TelemetryConfig = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(config_path).required(false))
            // Override with environment variables (prefix: AGENT_TELEMETRY_)
            .add_source(
                config::Environment::with_prefix("AGENT_TELEMETRY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("capture.sensitive_fields"),
            )
            .build()?
            .try_deserialize()?;

        config.check()?;
        Ok(config)
    }

    /// Validate field ranges
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| TelemetryError::Configuration(e.to_string()))
    }

    /// Whether tracing is enabled for the given component kind
    pub fn is_component_enabled(&self, component: ComponentKind) -> bool {
        self.tracing.enabled && self.tracing.components.is_enabled(component)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TracingConfig {
    /// Global tracing switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-component switches
    #[serde(default)]
    pub components: ComponentToggles,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            components: ComponentToggles::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentToggles {
    #[serde(default = "default_true")]
    pub tool: bool,
    #[serde(default = "default_true")]
    pub agent: bool,
    #[serde(default = "default_true")]
    pub workflow: bool,
    #[serde(default = "default_true")]
    pub model: bool,
    #[serde(default = "default_true")]
    pub database: bool,
    #[serde(default = "default_true")]
    pub api: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
    #[serde(default = "default_true")]
    pub system: bool,
}

impl ComponentToggles {
    pub fn is_enabled(&self, component: ComponentKind) -> bool {
        match component {
            ComponentKind::Tool => self.tool,
            ComponentKind::Agent => self.agent,
            ComponentKind::Workflow => self.workflow,
            ComponentKind::Model => self.model,
            ComponentKind::Database => self.database,
            ComponentKind::Api => self.api,
            ComponentKind::Memory => self.memory,
            ComponentKind::System => self.system,
        }
    }
}

impl Default for ComponentToggles {
    fn default() -> Self {
        Self {
            tool: true,
            agent: true,
            workflow: true,
            model: true,
            database: true,
            api: true,
            memory: true,
            system: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CaptureConfig {
    /// Capture unit-of-work inputs
    #[serde(default = "default_true")]
    pub capture_requests: bool,

    /// Capture unit-of-work results
    #[serde(default = "default_true")]
    pub capture_responses: bool,

    /// Maximum serialized request size (bytes)
    #[serde(default = "default_max_payload_size")]
    #[validate(range(min = 1))]
    pub max_request_size: usize,

    /// Maximum serialized response size (bytes)
    #[serde(default = "default_max_payload_size")]
    #[validate(range(min = 1))]
    pub max_response_size: usize,

    /// Key substrings whose values are redacted
    #[serde(default = "default_sensitive_fields")]
    pub sensitive_fields: Vec<String>,

    /// Embed an encoded hint instead of a plain redaction tag
    #[serde(default)]
    pub encrypt_sensitive: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_requests: true,
            capture_responses: true,
            max_request_size: default_max_payload_size(),
            max_response_size: default_max_payload_size(),
            sensitive_fields: default_sensitive_fields(),
            encrypt_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BufferConfig {
    /// Events held before an early flush
    #[serde(default = "default_buffer_size")]
    #[validate(range(min = 1))]
    pub buffer_size: usize,

    /// Timer flush interval in milliseconds (0 disables the timer)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Events delivered concurrently per sub-batch
    #[serde(default = "default_sub_batch_size")]
    #[validate(range(min = 1))]
    pub sub_batch_size: usize,

    /// Producer channel capacity
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1))]
    pub channel_capacity: usize,
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
            sub_batch_size: default_sub_batch_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    /// Time an open circuit waits before probing (milliseconds)
    #[serde(default = "default_recovery_timeout_ms")]
    #[validate(range(min = 1))]
    pub recovery_timeout_ms: u64,

    /// Reserved; not used by the counting algorithm (milliseconds)
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,

    /// Concurrent probes admitted while half-open
    #[serde(default = "default_half_open_max_requests")]
    #[validate(range(min = 1))]
    pub half_open_max_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Backend base URL
    pub endpoint: Option<String>,

    /// Public key (basic auth user)
    pub public_key: Option<String>,

    /// Secret key (basic auth password)
    pub secret_key: Option<String>,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,

    /// Deployment environment tag attached to traces
    pub environment: Option<String>,

    /// Release tag attached to traces
    pub release: Option<String>,
}

impl BackendConfig {
    /// True when endpoint and both keys are present and non-empty
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.endpoint) && present(&self.public_key) && present(&self.secret_key)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            public_key: None,
            secret_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            environment: None,
            release: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ErrorStoreConfig {
    /// Retained errors before FIFO eviction
    #[serde(default = "default_max_errors")]
    #[validate(range(min = 1))]
    pub max_errors: usize,

    /// Fingerprints reported by analysis
    #[serde(default = "default_top_fingerprints")]
    #[validate(range(min = 1))]
    pub top_fingerprints: usize,

    /// Occurrences of one fingerprint within the alert window that raise an alert
    #[serde(default = "default_alert_threshold")]
    #[validate(range(min = 1))]
    pub alert_threshold: usize,

    /// Alert window (seconds)
    #[serde(default = "default_alert_window_secs")]
    #[validate(range(min = 1))]
    pub alert_window_secs: u64,
}

impl Default for ErrorStoreConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
            top_fingerprints: default_top_fingerprints(),
            alert_threshold: default_alert_threshold(),
            alert_window_secs: default_alert_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
            service_name: default_service_name(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_payload_size() -> usize {
    10_000
}

pub(crate) fn default_sensitive_fields() -> Vec<String> {
    [
        "password",
        "passwd",
        "token",
        "secret",
        "api_key",
        "apikey",
        "access_key",
        "private_key",
        "authorization",
        "credential",
        "cookie",
        "ssn",
        "credit_card",
        "card_number",
        "cvv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_buffer_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_sub_batch_size() -> usize {
    10
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

fn default_monitoring_window_ms() -> u64 {
    60_000
}

fn default_half_open_max_requests() -> u32 {
    1
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_errors() -> usize {
    1_000
}

fn default_top_fingerprints() -> usize {
    10
}

fn default_alert_threshold() -> usize {
    10
}

fn default_alert_window_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "agent-telemetry".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_values() {
        let config = TelemetryConfig::default();
        assert_eq!(config.buffer.buffer_size, 100);
        assert_eq!(config.buffer.sub_batch_size, 10);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout_ms, 30_000);
        assert_eq!(config.circuit_breaker.monitoring_window_ms, 60_000);
        assert!(config.capture.sensitive_fields.contains(&"password".to_string()));
        assert!(!config.backend.is_configured());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_component_toggles() {
        let mut config = TelemetryConfig::default();
        config.tracing.components.tool = false;
        assert!(!config.is_component_enabled(ComponentKind::Tool));
        assert!(config.is_component_enabled(ComponentKind::Agent));

        config.tracing.enabled = false;
        assert!(!config.is_component_enabled(ComponentKind::Agent));
    }

    #[test]
    fn test_zero_flush_interval_disables_timer() {
        let buffer = BufferConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        assert!(buffer.flush_interval().is_none());
    }

    #[test]
    fn test_invalid_buffer_size_rejected() {
        let mut config = TelemetryConfig::default();
        config.buffer.buffer_size = 0;
        assert!(matches!(
            config.check(),
            Err(TelemetryError::Configuration(_))
        ));
    }

    #[test]
    fn test_backend_requires_all_credentials() {
        let backend = BackendConfig {
            endpoint: Some("https://telemetry.example.com".to_string()),
            public_key: Some("pk".to_string()),
            secret_key: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!backend.is_configured());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[buffer]\nbuffer_size = 7\n\n[circuit_breaker]\nfailure_threshold = 2\n"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = TelemetryConfig::load_from(&path).unwrap();
        assert_eq!(config.buffer.buffer_size, 7);
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.buffer.sub_batch_size, 10);
    }
}
