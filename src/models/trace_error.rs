use super::{ComponentKind, TraceContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Severity of a recorded error
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Check if severity requires immediate attention
    pub fn is_urgent(&self) -> bool {
        matches!(self, ErrorSeverity::High | ErrorSeverity::Critical)
    }
}

/// Normalized failure of a traced unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceError {
    pub id: Uuid,

    /// Error kind (usually the error's type name)
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    pub timestamp: DateTime<Utc>,

    pub severity: ErrorSeverity,

    pub component: ComponentKind,

    pub context: TraceContext,

    pub recoverable: bool,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl TraceError {
    /// Build a trace error; severity and recoverability are derived from the
    /// component and the error's kind/message.
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        component: ComponentKind,
        context: TraceContext,
    ) -> Self {
        let kind = kind.into();
        let message = message.into();
        let severity = crate::error_store::classify_severity(component, &kind, &message);
        let recoverable = crate::error_store::is_recoverable(component, &kind, &message);

        Self {
            id: Uuid::new_v4(),
            kind,
            code: None,
            message,
            stack: None,
            cause: None,
            timestamp: Utc::now(),
            severity,
            component,
            context,
            recoverable,
            metadata: HashMap::new(),
        }
    }

    /// Build from any displayable error; the kind is its short type name
    pub fn from_error<E>(error: &E, component: ComponentKind, context: TraceContext) -> Self
    where
        E: std::fmt::Display + ?Sized,
    {
        Self::new(short_type_name::<E>(), error.to_string(), component, context)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Last path segment of a type name, without generic arguments
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
