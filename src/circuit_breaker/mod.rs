//! Circuit breaker guarding calls to the remote telemetry backend.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: calls pass through; consecutive failures are counted
//! - **Open**: calls are skipped without touching the wrapped operation
//! - **Half-Open**: the recovery timeout elapsed; a probe call decides
//!   whether the circuit closes again or re-opens
//!
//! Skipping is not an error: [`CircuitBreaker::execute`] returns
//! [`BreakerOutcome::Skipped`] while the circuit is open and only surfaces
//! the wrapped operation's own error when the operation actually ran.
//!
//! # Example
//!
//! ```no_run
//! use agent_telemetry::circuit_breaker::{BreakerOutcome, CircuitBreaker, CircuitBreakerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CircuitBreakerConfig::builder()
//!         .failure_threshold(5)
//!         .recovery_timeout(std::time::Duration::from_secs(30))
//!         .build()?;
//!
//!     let breaker = CircuitBreaker::new("telemetry-backend", config);
//!
//!     match breaker
//!         .execute("create_trace", || async { Ok::<_, std::io::Error>(42) })
//!         .await?
//!     {
//!         BreakerOutcome::Executed(value) => println!("got {value}"),
//!         BreakerOutcome::Skipped => println!("backend is cooling down"),
//!     }
//!
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod metrics;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use core::{BreakerOutcome, CircuitBreaker, CircuitBreakerStats};
pub use metrics::{init_circuit_breaker_metrics, CIRCUIT_BREAKER_METRICS};
pub use state::{BreakerLedger, CircuitBreakerState, StateTransition, TransitionCause};

use crate::error::TelemetryError;

/// Result type for circuit breaker configuration
pub type CircuitBreakerResult<T> = std::result::Result<T, CircuitBreakerError>;

/// Errors that can occur while configuring a circuit breaker
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CircuitBreakerError> for TelemetryError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::InvalidConfig(msg) => TelemetryError::Configuration(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_error_conversion() {
        let err = CircuitBreakerError::InvalidConfig("failure_threshold".to_string());
        let converted: TelemetryError = err.into();
        assert!(matches!(converted, TelemetryError::Configuration(_)));
    }
}
