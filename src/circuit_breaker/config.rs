//! Breaker tuning and its builder.

use crate::circuit_breaker::CircuitBreakerError;
use crate::config::BreakerSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Quiet period after the last failure before a probe is admitted
    pub recovery_timeout: Duration,

    /// Reported in stats only; failures are counted consecutively
    pub monitoring_window: Duration,

    /// Concurrent probes admitted while half-open
    pub half_open_max_requests: u32,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        let zero_field = [
            ("failure_threshold", self.failure_threshold == 0),
            ("recovery_timeout", self.recovery_timeout.is_zero()),
            ("half_open_max_requests", self.half_open_max_requests == 0),
        ]
        .into_iter()
        .find_map(|(field, is_zero)| is_zero.then_some(field));

        match zero_field {
            Some(field) => Err(CircuitBreakerError::InvalidConfig(format!(
                "{} must be greater than 0",
                field
            ))),
            None => Ok(()),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
            half_open_max_requests: 1,
        }
    }
}

impl TryFrom<&BreakerSettings> for CircuitBreakerConfig {
    type Error = CircuitBreakerError;

    fn try_from(settings: &BreakerSettings) -> Result<Self, Self::Error> {
        CircuitBreakerConfig::builder()
            .failure_threshold(settings.failure_threshold)
            .recovery_timeout(Duration::from_millis(settings.recovery_timeout_ms))
            .monitoring_window(Duration::from_millis(settings.monitoring_window_ms))
            .half_open_max_requests(settings.half_open_max_requests)
            .build()
    }
}

/// Fluent builder; unset fields keep their defaults
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn monitoring_window(mut self, window: Duration) -> Self {
        self.config.monitoring_window = window;
        self
    }

    pub fn half_open_max_requests(mut self, probes: u32) -> Self {
        self.config.half_open_max_requests = probes;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
