use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one logical unit of work and its place in a causal chain.
///
/// Contexts are immutable once built; nesting produces a new context via
/// [`TraceContext::child`] rather than mutating the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Stable across the entire causal chain
    pub trace_id: String,

    /// Span of the current unit of work
    pub span_id: Option<String>,

    /// Span this unit of work is nested under
    pub parent_span_id: Option<String>,

    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<String>,

    /// Free-form correlation metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TraceContext {
    /// Create a root context with a freshly generated trace id
    pub fn new() -> Self {
        Self::with_trace_id(Uuid::new_v4().to_string())
    }

    /// Create a root context continuing an existing trace id
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: None,
            parent_span_id: None,
            user_id: None,
            session_id: None,
            workflow_id: None,
            agent_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_span(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Derive the context of a nested unit of work.
    ///
    /// The child keeps the trace id and correlation ids; its parent span is
    /// this context's span.
    pub fn child(&self, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Some(span_id.into()),
            parent_span_id: self.span_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            workflow_id: self.workflow_id.clone(),
            agent_id: self.agent_id.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}
