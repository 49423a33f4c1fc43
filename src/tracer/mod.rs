//! Execution tracing for agent-platform components.
//!
//! [`ExecutionTracer::trace_execution`] wraps a unit of work: it opens a
//! trace and span on the backend, records lifecycle events into the event
//! buffer, and closes the span with the sanitized result or the classified
//! error. Whatever happens while talking to the backend, the caller gets
//! back exactly what the unit of work returned.
//!
//! # Example
//! ```no_run
//! # async fn run(tracer: &agent_telemetry::tracer::ExecutionTracer) {
//! use agent_telemetry::models::TraceContext;
//! use serde_json::json;
//!
//! let hits = tracer
//!     .trace_tool("web_search", TraceContext::new(), &json!({"q": "rust"}), |_ctx| async {
//!         Ok::<_, std::io::Error>(vec!["https://www.rust-lang.org"])
//!     })
//!     .await;
//! # }
//! ```

mod executions;

pub use executions::{ActiveExecution, ExecutionPhase};

use crate::backend::{
    CreateSpanRequest, CreateTraceRequest, Delivery, ObservationUpdate, TelemetryBackendClient,
    TraceUpdate,
};
use crate::buffer::EventBuffer;
use crate::config::TelemetryConfig;
use crate::error_store::{ErrorContext, ErrorStore};
use crate::models::{
    names, ComponentKind, EventLevel, ErrorSeverity, PerformanceMetrics, TraceContext,
    TraceError, TraceEvent,
};
use crate::sanitizer::{CaptureKind, Payload, Sanitized, Sanitizer};
use chrono::Utc;
use executions::ExecutionRegistry;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Describes one unit of work to trace
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Context of the caller; the execution runs in a child span of it
    pub context: TraceContext,
    pub component: ComponentKind,
    pub name: String,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(context: TraceContext, component: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            context,
            component,
            name: name.into(),
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Orchestrates tracing of units of work
pub struct ExecutionTracer {
    config: Arc<TelemetryConfig>,
    sanitizer: Sanitizer,
    client: Arc<TelemetryBackendClient>,
    buffer: Arc<EventBuffer>,
    error_store: Arc<ErrorStore>,
    executions: ExecutionRegistry,
}

impl ExecutionTracer {
    pub fn new(
        config: Arc<TelemetryConfig>,
        client: Arc<TelemetryBackendClient>,
        buffer: Arc<EventBuffer>,
        error_store: Arc<ErrorStore>,
    ) -> Self {
        Self {
            sanitizer: Sanitizer::new(&config.capture),
            config,
            client,
            buffer,
            error_store,
            executions: ExecutionRegistry::default(),
        }
    }

    /// Whether work of this component kind is traced
    pub fn is_enabled(&self, component: ComponentKind) -> bool {
        self.config.is_component_enabled(component)
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Executions currently in flight, oldest first
    pub fn active_executions(&self) -> Vec<ActiveExecution> {
        self.executions.snapshot()
    }

    /// Run `work` under a trace.
    ///
    /// `work` receives the context of the execution's own span, for nesting.
    /// Its result or error is returned unchanged. Backend failures are
    /// recorded in the error store and never surface here.
    pub async fn trace_execution<I, T, E, F, Fut>(
        &self,
        request: ExecutionRequest,
        input: &I,
        work: F,
    ) -> Result<T, E>
    where
        I: Serialize + ?Sized,
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled(request.component) {
            return work(request.context).await;
        }

        let span_id = Uuid::new_v4().to_string();
        let context = request.context.child(span_id.clone());
        let guard = self.executions.begin(ActiveExecution {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            component: request.component,
            trace_id: context.trace_id.clone(),
            span_id: span_id.clone(),
            phase: ExecutionPhase::NotStarted,
            started_at: Utc::now(),
        });

        let input = self
            .sanitizer
            .sanitize_detailed(&Payload::from_serialize(input), CaptureKind::Request);
        self.start_trace(&request, &context, &input).await;
        guard.advance(ExecutionPhase::TraceStarted);

        self.log_trace_event(self.event(
            names::TRACE_STARTED,
            EventLevel::Info,
            &request,
            &context,
            format!("{} started", request.name),
            &input,
        ));

        guard.advance(ExecutionPhase::Executing);
        let started = Instant::now();
        let result = work(context.clone()).await;
        let metrics = PerformanceMetrics::from_duration(started.elapsed());

        match result {
            Ok(value) => {
                let output = self
                    .sanitizer
                    .sanitize_detailed(&Payload::from_serialize(&value), CaptureKind::Response);

                let update = ObservationUpdate {
                    trace_id: Some(context.trace_id.clone()),
                    output: Some(output.value.clone()),
                    metadata: Some(json!({ "metrics": metrics })),
                    end_time: Some(Utc::now()),
                    level: Some(EventLevel::Info.as_backend_level().to_string()),
                    status_message: None,
                };
                self.complete_span(&span_id, &update).await;
                self.complete_trace(
                    &context,
                    TraceUpdate {
                        output: Some(output.value.clone()),
                        metadata: Some(json!({
                            "status": "success",
                            "metrics": metrics,
                            "endTime": update.end_time,
                        })),
                        tags: request.tags.clone(),
                    },
                )
                .await;

                self.log_trace_event(
                    self.event(
                        names::TRACE_COMPLETED,
                        EventLevel::Info,
                        &request,
                        &context,
                        format!("{} completed in {}ms", request.name, metrics.duration_ms),
                        &output,
                    )
                    .with_metrics(metrics),
                );

                guard.advance(ExecutionPhase::Completed);
                Ok(value)
            }
            Err(err) => {
                let trace_error = TraceError::from_error(&err, request.component, context.clone())
                    .with_metadata("execution", request.name.clone());
                self.error_store
                    .record_trace_error(&trace_error, &request.name);

                let update = ObservationUpdate {
                    trace_id: Some(context.trace_id.clone()),
                    output: None,
                    metadata: Some(json!({
                        "metrics": metrics,
                        "error": {
                            "kind": trace_error.kind,
                            "severity": trace_error.severity,
                            "recoverable": trace_error.recoverable,
                        }
                    })),
                    end_time: Some(Utc::now()),
                    level: Some(EventLevel::Error.as_backend_level().to_string()),
                    status_message: Some(trace_error.message.clone()),
                };
                self.complete_span(&span_id, &update).await;
                self.complete_trace(
                    &context,
                    TraceUpdate {
                        output: None,
                        metadata: Some(json!({
                            "status": "error",
                            "statusMessage": trace_error.message,
                            "errorKind": trace_error.kind,
                            "severity": trace_error.severity,
                            "metrics": metrics,
                            "endTime": update.end_time,
                        })),
                        tags: request.tags.clone(),
                    },
                )
                .await;

                let level = if trace_error.severity == ErrorSeverity::Critical {
                    EventLevel::Fatal
                } else {
                    EventLevel::Error
                };
                self.log_trace_event(
                    TraceEvent::new(
                        names::ERROR_OCCURRED,
                        level,
                        request.component,
                        context.clone(),
                        format!("{} failed: {}", request.name, trace_error.message),
                    )
                    .with_metrics(metrics)
                    .with_error(trace_error),
                );

                guard.advance(ExecutionPhase::Failed);
                Err(err)
            }
        }
    }

    /// Queue an event for delivery; returns whether it was accepted
    pub fn log_trace_event(&self, event: TraceEvent) -> bool {
        if !self.is_enabled(event.component) {
            return false;
        }
        self.buffer.record(event)
    }

    pub async fn trace_tool<I, T, E, F, Fut>(
        &self,
        tool: &str,
        context: TraceContext,
        input: &I,
        work: F,
    ) -> Result<T, E>
    where
        I: Serialize + ?Sized,
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let request = ExecutionRequest::new(context, ComponentKind::Tool, tool).with_tag("tool");
        self.trace_execution(request, input, work).await
    }

    pub async fn trace_agent<I, T, E, F, Fut>(
        &self,
        agent: &str,
        context: TraceContext,
        input: &I,
        work: F,
    ) -> Result<T, E>
    where
        I: Serialize + ?Sized,
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let context = if context.agent_id.is_none() {
            context.with_agent(agent)
        } else {
            context
        };
        let request = ExecutionRequest::new(context, ComponentKind::Agent, agent).with_tag("agent");
        self.trace_execution(request, input, work).await
    }

    pub async fn trace_workflow<I, T, E, F, Fut>(
        &self,
        workflow: &str,
        context: TraceContext,
        input: &I,
        work: F,
    ) -> Result<T, E>
    where
        I: Serialize + ?Sized,
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let context = if context.workflow_id.is_none() {
            context.with_workflow(workflow)
        } else {
            context
        };
        let request =
            ExecutionRequest::new(context, ComponentKind::Workflow, workflow).with_tag("workflow");
        self.trace_execution(request, input, work).await
    }

    /// Trace a model call; `model` is recorded in the span metadata
    pub async fn trace_model_call<I, T, E, F, Fut>(
        &self,
        model: &str,
        context: TraceContext,
        input: &I,
        work: F,
    ) -> Result<T, E>
    where
        I: Serialize + ?Sized,
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let request = ExecutionRequest::new(context, ComponentKind::Model, format!("model:{}", model))
            .with_tag("model")
            .with_metadata("model", model);
        self.trace_execution(request, input, work).await
    }

    fn event(
        &self,
        name: &str,
        level: EventLevel,
        request: &ExecutionRequest,
        context: &TraceContext,
        message: String,
        payload: &Sanitized,
    ) -> TraceEvent {
        let mut event = TraceEvent::new(name, level, request.component, context.clone(), message)
            .with_data(payload.value.clone())
            .with_compliance(payload.redactions > 0);
        for tag in &request.tags {
            event = event.with_tag(tag.clone());
        }
        event
    }

    /// Create the trace (root executions only) and the execution's span
    async fn start_trace(&self, request: &ExecutionRequest, context: &TraceContext, input: &Sanitized) {
        let mut metadata = request.metadata.clone();
        metadata.insert("component".to_string(), json!(request.component));
        if let Some(workflow_id) = &context.workflow_id {
            metadata.insert("workflowId".to_string(), json!(workflow_id));
        }
        if let Some(agent_id) = &context.agent_id {
            metadata.insert("agentId".to_string(), json!(agent_id));
        }
        for (key, value) in &context.metadata {
            metadata.entry(key.clone()).or_insert_with(|| json!(value));
        }
        let metadata = Value::Object(metadata);

        if context.parent_span_id.is_none() {
            let trace = CreateTraceRequest {
                user_id: context.user_id.clone(),
                session_id: context.session_id.clone(),
                metadata: Some(metadata.clone()),
                tags: request.tags.clone(),
                input: Some(input.value.clone()),
                ..CreateTraceRequest::new(context.trace_id.clone(), request.name.clone())
            };
            let delivery = self.client.create_trace(&trace).await;
            self.note_backend_outcome("create_trace", context, &delivery);
        }

        let span = CreateSpanRequest {
            id: context.span_id.clone().unwrap_or_default(),
            input: Some(input.value.clone()),
            metadata: Some(metadata),
            parent_span_id: context.parent_span_id.clone(),
            ..CreateSpanRequest::new(context.trace_id.clone(), request.name.clone())
        };
        let delivery = self.client.create_span(&span).await;
        self.note_backend_outcome("create_span", context, &delivery);
    }

    async fn complete_span(&self, span_id: &str, update: &ObservationUpdate) {
        let delivery = self.client.update_observation(span_id, update).await;
        if let Delivery::Failed(e) = &delivery {
            self.record_backend_failure("update_observation", update.trace_id.as_deref(), e);
        }
    }

    /// Close the trace of a root execution; nested executions only own a span
    async fn complete_trace(&self, context: &TraceContext, update: TraceUpdate) {
        if context.parent_span_id.is_some() {
            return;
        }
        let delivery = self.client.update_trace(&context.trace_id, &update).await;
        self.note_backend_outcome("update_trace", context, &delivery);
    }

    fn note_backend_outcome<T>(&self, operation: &str, context: &TraceContext, delivery: &Delivery<T>) {
        match delivery {
            Delivery::Failed(e) => {
                self.record_backend_failure(operation, Some(context.trace_id.as_str()), e)
            }
            Delivery::Skipped => debug!(operation, "Backend circuit open, {} skipped", operation),
            Delivery::Disabled | Delivery::Delivered(_) => {}
        }
    }

    fn record_backend_failure(
        &self,
        operation: &str,
        trace_id: Option<&str>,
        error: &crate::backend::BackendError,
    ) {
        warn!(operation, error = %error, "Telemetry backend call failed during tracing");
        let mut context = ErrorContext::new(ComponentKind::Database, operation, error.kind());
        if let Some(trace_id) = trace_id {
            context = context.with_trace(trace_id);
        }
        self.error_store.record_classified(error.to_string(), context);
    }
}
