//! Deterministic severity and recoverability rules.

use crate::models::{ComponentKind, ErrorSeverity};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CONNECTIVITY_PATTERN: Regex = Regex::new(
        r"(?i)(connection refused|econnrefused|timed? ?out|etimedout|deadline exceeded)"
    )
    .expect("valid regex");

    static ref NETWORK_PATTERN: Regex = Regex::new(
        r"(?i)(network|connection|socket|econnreset|timed? ?out|etimedout|unreachable|temporarily unavailable)"
    )
    .expect("valid regex");

    static ref VALIDATION_PATTERN: Regex = Regex::new(
        r"(?i)(validation|invalid|type ?error|schema|malformed|parse)"
    )
    .expect("valid regex");
}

/// Severity of an error raised by `component`.
///
/// Connectivity failures are critical everywhere; infrastructure
/// components (database, api, system) are at least high; orchestration
/// components (tool, agent, workflow) default to medium; the rest are low.
pub fn classify_severity(component: ComponentKind, kind: &str, message: &str) -> ErrorSeverity {
    if CONNECTIVITY_PATTERN.is_match(message) || CONNECTIVITY_PATTERN.is_match(kind) {
        return ErrorSeverity::Critical;
    }

    match component {
        ComponentKind::Database | ComponentKind::Api | ComponentKind::System => ErrorSeverity::High,
        ComponentKind::Tool | ComponentKind::Agent | ComponentKind::Workflow => {
            ErrorSeverity::Medium
        }
        ComponentKind::Model | ComponentKind::Memory => ErrorSeverity::Low,
    }
}

/// Whether retrying the failed work could plausibly succeed
pub fn is_recoverable(component: ComponentKind, kind: &str, message: &str) -> bool {
    if NETWORK_PATTERN.is_match(message) || NETWORK_PATTERN.is_match(kind) {
        return true;
    }

    if VALIDATION_PATTERN.is_match(message) || VALIDATION_PATTERN.is_match(kind) {
        return false;
    }

    matches!(component, ComponentKind::Tool | ComponentKind::Agent)
}
