use crate::models::{ComponentKind, ErrorSeverity, TraceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Where an error happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub component: ComponentKind,

    /// Operation or unit-of-work name
    pub operation: String,

    /// Error kind (type name or category)
    pub error_kind: String,

    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: ComponentKind, operation: impl Into<String>, error_kind: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            error_kind: error_kind.into(),
            trace_id: None,
            span_id: None,
            user_id: None,
            session_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Context for a traced failure
    pub fn from_trace_error(error: &TraceError, operation: impl Into<String>) -> Self {
        Self {
            component: error.component,
            operation: operation.into(),
            error_kind: error.kind.clone(),
            trace_id: Some(error.context.trace_id.clone()),
            span_id: error.context.span_id.clone(),
            user_id: error.context.user_id.clone(),
            session_id: error.context.session_id.clone(),
            metadata: error.metadata.clone(),
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A stored error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemError {
    pub id: Uuid,
    pub message: String,
    pub code: Option<String>,
    pub stack: Option<String>,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub severity: ErrorSeverity,
}

/// Filters for [`super::ErrorStore::query`]; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ErrorQuery {
    pub component: Option<ComponentKind>,
    /// Minimum severity
    pub severity: Option<ErrorSeverity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
    pub limit: Option<usize>,
}

impl ErrorQuery {
    pub fn component(mut self, component: ComponentKind) -> Self {
        self.component = Some(component);
        self
    }

    pub fn min_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, error: &SystemError) -> bool {
        self.component.map_or(true, |c| error.context.component == c)
            && self.severity.map_or(true, |s| error.severity >= s)
            && self.since.map_or(true, |t| error.timestamp >= t)
            && self.until.map_or(true, |t| error.timestamp <= t)
            && self
                .fingerprint
                .as_deref()
                .map_or(true, |f| error.fingerprint == f)
    }
}

/// Occurrences of one fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintCount {
    pub fingerprint: String,
    pub count: usize,
    pub last_seen: DateTime<Utc>,
    pub component: ComponentKind,
    pub sample_message: String,
}

/// Aggregate view over a time window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub window_start: Option<DateTime<Utc>>,
    pub total: usize,
    pub by_component: BTreeMap<ComponentKind, usize>,
    pub by_severity: BTreeMap<ErrorSeverity, usize>,
    /// Most frequent first
    pub top_fingerprints: Vec<FingerprintCount>,
}

/// Raised when an error class recurs too often or a critical error appears
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAlert {
    pub fingerprint: String,
    pub severity: ErrorSeverity,
    pub count: usize,
    pub message: String,
    pub component: ComponentKind,
    pub last_seen: DateTime<Utc>,
}
