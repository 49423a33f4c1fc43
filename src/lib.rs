//! Resilient telemetry pipeline for AI-agent executions.
//!
//! Traces tools, agents, workflows and model calls, and ships the result to
//! a remote observability backend without blocking or failing the traced
//! work:
//!
//! - [`circuit_breaker`] isolates a failing backend
//! - [`sanitizer`] redacts and truncates payloads before they leave the process
//! - [`error_store`] fingerprints and retains recent errors
//! - [`backend`] is the lazily-initialized, circuit-broken backend client
//! - [`buffer`] batches events and flushes them in the background
//! - [`tracer`] wraps units of work and ties the above together
//!
//! [`pipeline::TelemetryPipeline`] builds all of them from one
//! [`config::TelemetryConfig`].

pub mod backend;
pub mod buffer;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod error_store;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod sanitizer;
pub mod tracer;

pub use config::TelemetryConfig;
pub use error::{Result, TelemetryError};
pub use pipeline::TelemetryPipeline;
