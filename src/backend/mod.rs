//! Remote telemetry backend: wire types, transports and the
//! circuit-broken client.
//!
//! [`TelemetryBackendClient`] is what the rest of the pipeline talks to.
//! It never returns an error; every operation yields a [`Delivery`] that
//! distinguishes a disabled backend, an open circuit, a failed call and a
//! delivered one.

mod client;
mod http;
mod memory;
mod types;

pub use client::TelemetryBackendClient;
pub use http::{HttpBackend, HttpConnector};
pub use memory::{BackendCall, InMemoryBackend};
pub use types::{
    BackendConnector, BackendError, CreateEventRequest, CreateSpanRequest, CreateTraceRequest,
    Delivery, HealthStatus, ObservationUpdate, StaticConnector, TelemetryBackend, TraceUpdate,
};
