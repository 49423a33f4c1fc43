use thiserror::Error;

/// Telemetry pipeline error types
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend delivery errors
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The event buffer is no longer accepting events
    #[error("Event buffer closed")]
    BufferClosed,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TelemetryError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            TelemetryError::Configuration(_) => "CONFIGURATION_ERROR",
            TelemetryError::Validation(_) => "VALIDATION_ERROR",
            TelemetryError::Backend(_) => "BACKEND_ERROR",
            TelemetryError::Serialization(_) => "SERIALIZATION_ERROR",
            TelemetryError::Io(_) => "IO_ERROR",
            TelemetryError::Timeout(_) => "TIMEOUT",
            TelemetryError::BufferClosed => "BUFFER_CLOSED",
            TelemetryError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for TelemetryError {
    fn from(err: validator::ValidationErrors) -> Self {
        TelemetryError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        TelemetryError::Configuration(err.to_string())
    }
}

/// Conversion from prometheus::Error
impl From<prometheus::Error> for TelemetryError {
    fn from(err: prometheus::Error) -> Self {
        TelemetryError::Internal(format!("metrics: {}", err))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TelemetryError>;
