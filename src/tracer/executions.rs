use crate::metrics::ACTIVE_EXECUTIONS;
use crate::models::ComponentKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use uuid::Uuid;

/// Lifecycle of one traced unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExecutionPhase {
    NotStarted,
    TraceStarted,
    Executing,
    Completed,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Completed | ExecutionPhase::Failed)
    }

    /// Whether `next` is a legal successor of this phase
    pub fn can_transition_to(&self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, next),
            (NotStarted, TraceStarted)
                | (TraceStarted, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }
}

/// Snapshot of an in-flight execution
#[derive(Debug, Clone, Serialize)]
pub struct ActiveExecution {
    pub id: Uuid,
    pub name: String,
    pub component: ComponentKind,
    pub trace_id: String,
    pub span_id: String,
    pub phase: ExecutionPhase,
    pub started_at: DateTime<Utc>,
}

/// Executions currently being traced
#[derive(Debug, Default, Clone)]
pub(crate) struct ExecutionRegistry {
    active: Arc<DashMap<Uuid, ActiveExecution>>,
}

impl ExecutionRegistry {
    pub(crate) fn begin(&self, execution: ActiveExecution) -> ExecutionGuard {
        let id = execution.id;
        self.active.insert(id, execution);
        ACTIVE_EXECUTIONS.inc();
        ExecutionGuard {
            registry: self.clone(),
            id,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<ActiveExecution> {
        let mut executions: Vec<ActiveExecution> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        executions.sort_by_key(|e| e.started_at);
        executions
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

/// Removes the execution from the registry when the traced future ends,
/// including when it is dropped mid-flight.
pub(crate) struct ExecutionGuard {
    registry: ExecutionRegistry,
    id: Uuid,
}

impl ExecutionGuard {
    pub(crate) fn advance(&self, next: ExecutionPhase) {
        if let Some(mut entry) = self.registry.active.get_mut(&self.id) {
            if entry.phase.can_transition_to(next) {
                entry.phase = next;
            } else {
                tracing::warn!(
                    execution_id = %self.id,
                    from = %entry.phase,
                    to = %next,
                    "Ignoring invalid execution phase transition"
                );
            }
        }
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if self.registry.active.remove(&self.id).is_some() {
            ACTIVE_EXECUTIONS.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> ActiveExecution {
        ActiveExecution {
            id: Uuid::new_v4(),
            name: "search".to_string(),
            component: ComponentKind::Tool,
            trace_id: "t".to_string(),
            span_id: "s".to_string(),
            phase: ExecutionPhase::NotStarted,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_phase_transitions() {
        use ExecutionPhase::*;
        assert!(NotStarted.can_transition_to(TraceStarted));
        assert!(Executing.can_transition_to(Failed));
        assert!(!NotStarted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Executing));
        assert!(Failed.is_terminal());
        assert_eq!(TraceStarted.to_string(), "trace-started");
    }

    #[test]
    fn test_guard_tracks_phase_and_removes_on_drop() {
        let registry = ExecutionRegistry::default();
        let guard = registry.begin(execution());

        guard.advance(ExecutionPhase::TraceStarted);
        guard.advance(ExecutionPhase::Completed); // invalid, ignored
        assert_eq!(registry.snapshot()[0].phase, ExecutionPhase::TraceStarted);

        drop(guard);
        assert_eq!(registry.len(), 0);
    }
}
