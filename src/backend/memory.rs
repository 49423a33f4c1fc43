//! In-process backend that records every call.
//!
//! Used by the test suites and the CLI dry-run mode. Failures and latency
//! can be injected to exercise the circuit breaker and the flusher.

use super::types::{
    BackendError, CreateEventRequest, CreateSpanRequest, CreateTraceRequest, ObservationUpdate,
    TelemetryBackend, TraceUpdate,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::time::Duration;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateTrace(CreateTraceRequest),
    CreateSpan(CreateSpanRequest),
    CreateEvent(CreateEventRequest),
    UpdateObservation { id: String, update: ObservationUpdate },
    UpdateTrace { id: String, update: TraceUpdate },
    Flush,
}

impl BackendCall {
    pub fn operation(&self) -> &'static str {
        match self {
            BackendCall::CreateTrace(_) => "create_trace",
            BackendCall::CreateSpan(_) => "create_span",
            BackendCall::CreateEvent(_) => "create_event",
            BackendCall::UpdateObservation { .. } => "update_observation",
            BackendCall::UpdateTrace { .. } => "update_trace",
            BackendCall::Flush => "flush",
        }
    }
}

#[derive(Debug, Default)]
struct Behaviour {
    failure: Option<BackendError>,
    /// Remaining calls to fail; `None` fails until cleared
    failures_left: Option<usize>,
    delay: Option<Duration>,
}

/// Backend keeping calls in memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    calls: Mutex<Vec<BackendCall>>,
    behaviour: RwLock<Behaviour>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `error` until [`InMemoryBackend::recover`]
    pub fn fail_with(&self, error: BackendError) {
        let mut behaviour = self.behaviour.write();
        behaviour.failure = Some(error);
        behaviour.failures_left = None;
    }

    /// Fail the next `count` calls with `error`
    pub fn fail_times(&self, count: usize, error: BackendError) {
        let mut behaviour = self.behaviour.write();
        behaviour.failure = Some(error);
        behaviour.failures_left = Some(count);
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.behaviour.write().delay = delay;
    }

    /// Stop injecting failures
    pub fn recover(&self) {
        let mut behaviour = self.behaviour.write();
        behaviour.failure = None;
        behaviour.failures_left = None;
    }

    /// All successful calls, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Events delivered, in order
    pub fn events(&self) -> Vec<CreateEventRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::CreateEvent(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    async fn handle(&self, call: BackendCall) -> Result<(), BackendError> {
        let delay = self.behaviour.read().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        self.calls.lock().push(call);
        Ok(())
    }

    fn take_failure(&self) -> Option<BackendError> {
        let mut behaviour = self.behaviour.write();
        let error = behaviour.failure.clone()?;

        match behaviour.failures_left {
            None => Some(error),
            Some(0) => {
                behaviour.failure = None;
                behaviour.failures_left = None;
                None
            }
            Some(left) => {
                behaviour.failures_left = Some(left - 1);
                if left == 1 {
                    behaviour.failure = None;
                    behaviour.failures_left = None;
                }
                Some(error)
            }
        }
    }
}

#[async_trait]
impl TelemetryBackend for InMemoryBackend {
    async fn create_trace(&self, request: &CreateTraceRequest) -> Result<String, BackendError> {
        self.handle(BackendCall::CreateTrace(request.clone())).await?;
        Ok(request.id.clone())
    }

    async fn create_span(&self, request: &CreateSpanRequest) -> Result<String, BackendError> {
        self.handle(BackendCall::CreateSpan(request.clone())).await?;
        Ok(request.id.clone())
    }

    async fn create_event(&self, request: &CreateEventRequest) -> Result<String, BackendError> {
        self.handle(BackendCall::CreateEvent(request.clone())).await?;
        Ok(request.id.clone())
    }

    async fn update_observation(
        &self,
        id: &str,
        update: &ObservationUpdate,
    ) -> Result<bool, BackendError> {
        self.handle(BackendCall::UpdateObservation {
            id: id.to_string(),
            update: update.clone(),
        })
        .await?;
        Ok(true)
    }

    async fn update_trace(&self, id: &str, update: &TraceUpdate) -> Result<bool, BackendError> {
        self.handle(BackendCall::UpdateTrace {
            id: id.to_string(),
            update: update.clone(),
        })
        .await?;
        Ok(true)
    }

    async fn flush(&self) -> Result<(), BackendError> {
        self.handle(BackendCall::Flush).await
    }
}
