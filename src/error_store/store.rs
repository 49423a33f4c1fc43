use super::classify::classify_severity;
use super::fingerprint::fingerprint;
use super::models::{
    ErrorAlert, ErrorAnalysis, ErrorContext, ErrorQuery, FingerprintCount, SystemError,
};
use crate::config::ErrorStoreConfig;
use crate::metrics::ERRORS_RECORDED_TOTAL;
use crate::models::{ErrorSeverity, TraceError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded, insertion-ordered store of recent errors.
///
/// Every recorded error is kept; once `max_errors` is exceeded the oldest
/// entries are evicted first. Append and eviction happen under one lock.
pub struct ErrorStore {
    entries: Mutex<VecDeque<SystemError>>,
    config: ErrorStoreConfig,
}

impl ErrorStore {
    pub fn new(config: ErrorStoreConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_errors.min(1024))),
            config,
        }
    }

    /// Record an error with an explicit severity
    pub fn record_error(
        &self,
        message: impl Into<String>,
        code: Option<String>,
        stack: Option<String>,
        context: ErrorContext,
        severity: ErrorSeverity,
    ) -> SystemError {
        let message = message.into();
        let error = SystemError {
            id: Uuid::new_v4(),
            fingerprint: fingerprint(
                context.component,
                &context.operation,
                &context.error_kind,
                &message,
            ),
            message,
            code,
            stack,
            context,
            timestamp: Utc::now(),
            severity,
        };

        {
            let mut entries = self.entries.lock();
            entries.push_back(error.clone());
            while entries.len() > self.config.max_errors {
                entries.pop_front();
            }
        }

        let component = error.context.component.to_string();
        let severity = error.severity.to_string();
        ERRORS_RECORDED_TOTAL
            .with_label_values(&[component.as_str(), severity.as_str()])
            .inc();

        debug!(
            component = %error.context.component,
            operation = %error.context.operation,
            severity = %error.severity,
            fingerprint = %error.fingerprint,
            "Recorded error: {}",
            error.message
        );

        error
    }

    /// Record an error, classifying its severity from the context
    pub fn record_classified(
        &self,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> SystemError {
        let message = message.into();
        let severity = classify_severity(context.component, &context.error_kind, &message);
        self.record_error(message, None, None, context, severity)
    }

    /// Record a traced failure under `operation`
    pub fn record_trace_error(&self, error: &TraceError, operation: &str) -> SystemError {
        self.record_error(
            error.message.clone(),
            error.code.clone(),
            error.stack.clone(),
            ErrorContext::from_trace_error(error, operation),
            error.severity,
        )
    }

    /// Matching errors, newest first
    pub fn query(&self, query: &ErrorQuery) -> Vec<SystemError> {
        let entries = self.entries.lock();
        let matching = entries.iter().rev().filter(|e| query.matches(e)).cloned();

        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Aggregate errors recorded within `window` (all retained errors if `None`)
    pub fn analyze(&self, window: Option<Duration>) -> ErrorAnalysis {
        let window_start = window.and_then(window_start);
        let entries = self.entries.lock();

        let mut analysis = ErrorAnalysis {
            window_start,
            ..Default::default()
        };
        let mut groups: HashMap<&str, FingerprintCount> = HashMap::new();

        for error in entries
            .iter()
            .filter(|e| window_start.map_or(true, |start| e.timestamp >= start))
        {
            analysis.total += 1;
            *analysis.by_component.entry(error.context.component).or_insert(0) += 1;
            *analysis.by_severity.entry(error.severity).or_insert(0) += 1;

            groups
                .entry(error.fingerprint.as_str())
                .and_modify(|group| {
                    group.count += 1;
                    // Iteration is oldest first
                    group.last_seen = error.timestamp;
                    group.sample_message = error.message.clone();
                })
                .or_insert_with(|| FingerprintCount {
                    fingerprint: error.fingerprint.clone(),
                    count: 1,
                    last_seen: error.timestamp,
                    component: error.context.component,
                    sample_message: error.message.clone(),
                });
        }

        let mut top: Vec<FingerprintCount> = groups.into_values().collect();
        top.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        top.truncate(self.config.top_fingerprints);
        analysis.top_fingerprints = top;

        analysis
    }

    /// Alerts for the configured alert window.
    ///
    /// A fingerprint alerts when it reaches `alert_threshold` occurrences in
    /// the window, or when any of its occurrences in the window is critical.
    pub fn check_alerts(&self) -> Vec<ErrorAlert> {
        let start = window_start(Duration::from_secs(self.config.alert_window_secs));
        let entries = self.entries.lock();

        let mut groups: HashMap<&str, ErrorAlert> = HashMap::new();
        for error in entries
            .iter()
            .filter(|e| start.map_or(true, |start| e.timestamp >= start))
        {
            groups
                .entry(error.fingerprint.as_str())
                .and_modify(|alert| {
                    alert.count += 1;
                    alert.severity = alert.severity.max(error.severity);
                    alert.last_seen = error.timestamp;
                    alert.message = error.message.clone();
                })
                .or_insert_with(|| ErrorAlert {
                    fingerprint: error.fingerprint.clone(),
                    severity: error.severity,
                    count: 1,
                    message: error.message.clone(),
                    component: error.context.component,
                    last_seen: error.timestamp,
                });
        }

        let mut alerts: Vec<ErrorAlert> = groups
            .into_values()
            .filter(|alert| {
                alert.count >= self.config.alert_threshold
                    || alert.severity == ErrorSeverity::Critical
            })
            .collect();
        drop(entries);
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| b.count.cmp(&a.count)));

        for alert in &alerts {
            warn!(
                fingerprint = %alert.fingerprint,
                component = %alert.component,
                severity = %alert.severity,
                count = alert.count,
                "Error alert: {}",
                alert.message
            );
        }

        alerts
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.config.max_errors
    }
}

impl Default for ErrorStore {
    fn default() -> Self {
        Self::new(ErrorStoreConfig::default())
    }
}

fn window_start(window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| Utc::now().checked_sub_signed(w))
}
