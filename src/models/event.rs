use super::{TraceContext, TraceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Severity of a trace event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl EventLevel {
    /// Observation level understood by the backend
    pub fn as_backend_level(&self) -> &'static str {
        match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "DEFAULT",
            EventLevel::Warn => "WARNING",
            EventLevel::Error | EventLevel::Fatal => "ERROR",
        }
    }
}

/// Kind of platform component that produced a trace
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComponentKind {
    Tool,
    Agent,
    Workflow,
    Model,
    Database,
    Api,
    Memory,
    System,
}

/// Execution timing and optional resource figures
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
}

impl PerformanceMetrics {
    pub fn from_duration(elapsed: Duration) -> Self {
        Self {
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ..Default::default()
        }
    }
}

/// Well-known event names emitted by the tracer
pub mod names {
    pub const TRACE_STARTED: &str = "trace_started";
    pub const TRACE_COMPLETED: &str = "trace_completed";
    pub const ERROR_OCCURRED: &str = "error_occurred";
}

/// One discrete observation of a traced unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Unique identifier
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub level: EventLevel,

    pub component: ComponentKind,

    /// Owning context
    pub context: TraceContext,

    /// Event name (e.g. `trace_started`)
    pub name: String,

    /// Human-readable message
    pub message: String,

    /// Already-sanitized payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceMetrics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Event was produced under compliance (redaction) rules
    #[serde(default)]
    pub compliance: bool,
}

impl TraceEvent {
    /// Create a new event
    pub fn new(
        name: impl Into<String>,
        level: EventLevel,
        component: ComponentKind,
        context: TraceContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            component,
            context,
            name: name.into(),
            message: message.into(),
            data: None,
            metrics: None,
            error: None,
            tags: BTreeSet::new(),
            compliance: false,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_error(mut self, error: TraceError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_compliance(mut self, compliance: bool) -> Self {
        self.compliance = compliance;
        self
    }

    /// Metadata attached to the backend event
    pub fn backend_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "eventId": self.id,
            "component": self.component,
            "level": self.level,
            "tags": self.tags,
            "compliance": self.compliance,
            "spanId": self.context.span_id,
            "parentSpanId": self.context.parent_span_id,
            "metrics": self.metrics,
            "timestamp": self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_component_kind_strings() {
        assert_eq!(ComponentKind::Database.to_string(), "database");
        assert_eq!(ComponentKind::from_str("tool").unwrap(), ComponentKind::Tool);
        assert_eq!(
            serde_json::to_value(ComponentKind::Workflow).unwrap(),
            serde_json::json!("workflow")
        );
    }

    #[test]
    fn test_level_ordering() {
        assert!(EventLevel::Fatal > EventLevel::Error);
        assert!(EventLevel::Debug < EventLevel::Info);
        assert_eq!(EventLevel::Warn.as_backend_level(), "WARNING");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let ctx = TraceContext::new();
        let a = TraceEvent::new("x", EventLevel::Info, ComponentKind::Tool, ctx.clone(), "a");
        let b = TraceEvent::new("x", EventLevel::Info, ComponentKind::Tool, ctx, "b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_tags_deduplicate() {
        let event = TraceEvent::new(
            names::TRACE_STARTED,
            EventLevel::Info,
            ComponentKind::Agent,
            TraceContext::new(),
            "started",
        )
        .with_tag("agent")
        .with_tag("agent");
        assert_eq!(event.tags.len(), 1);
    }

    #[test]
    fn test_metrics_from_duration() {
        let metrics = PerformanceMetrics::from_duration(Duration::from_millis(1500));
        assert_eq!(metrics.duration_ms, 1500);
        assert!(metrics.memory_bytes.is_none());
    }
}
