use super::EventSink;
use crate::backend::Delivery;
use crate::config::BufferConfig;
use crate::error::{Result, TelemetryError};
use crate::error_store::{ErrorContext, ErrorStore};
use crate::metrics::{
    EVENTS_DELIVERED_TOTAL, EVENTS_DROPPED_TOTAL, EVENTS_RECORDED_TOTAL, FLUSHES_TOTAL,
    FLUSH_DURATION_SECONDS,
};
use crate::models::{ComponentKind, TraceEvent};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Timer,
    BufferFull,
    Manual,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Timer => "timer",
            FlushTrigger::BufferFull => "buffer_full",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Events taken out of the buffer
    pub events: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Not sent because the circuit was open
    pub skipped: usize,
    /// Not sent because the backend is disabled
    pub disabled: usize,
    pub sub_batches: usize,
}

impl FlushReport {
    fn merge(&mut self, other: &FlushReport) {
        self.events += other.events;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.disabled += other.disabled;
        self.sub_batches += other.sub_batches;
    }
}

/// Buffer counters since start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Events currently waiting for the next flush
    pub buffered: usize,
    /// Events accepted by `record`
    pub recorded: u64,
    /// Events refused by `record` (channel full or closed)
    pub dropped: u64,
    /// Non-empty flushes performed
    pub flushes: u64,
    pub delivered: u64,
    pub failed: u64,
    pub skipped: u64,
    pub disabled: u64,
}

enum Command {
    Record(TraceEvent),
    Flush(oneshot::Sender<FlushReport>),
    Stats(oneshot::Sender<BufferStats>),
    Shutdown(oneshot::Sender<FlushReport>),
}

/// Handle to the flusher task.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct EventBuffer {
    sender: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
    recorded: AtomicU64,
    dropped: AtomicU64,
}

impl EventBuffer {
    /// Spawn the flusher task. Must be called inside a Tokio runtime.
    pub fn start(config: BufferConfig, sink: Arc<dyn EventSink>, error_store: Arc<ErrorStore>) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));

        info!(
            buffer_size = config.buffer_size,
            flush_interval_ms = config.flush_interval_ms,
            sub_batch_size = config.sub_batch_size,
            "Starting event buffer"
        );

        let flusher = Flusher {
            buffer: Vec::with_capacity(config.buffer_size),
            config,
            sink,
            error_store,
            totals: BufferStats::default(),
        };
        let task = tokio::spawn(flusher.run(receiver));

        Self {
            sender,
            task: Mutex::new(Some(task)),
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an event for delivery without waiting.
    ///
    /// Returns `false` when the event was dropped because the channel is
    /// full or the buffer has shut down.
    pub fn record(&self, event: TraceEvent) -> bool {
        match self.sender.try_send(Command::Record(event)) {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                EVENTS_RECORDED_TOTAL.inc();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EVENTS_DROPPED_TOTAL.with_label_values(&["buffer_full"]).inc();
                warn!("Event channel full, dropping trace event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EVENTS_DROPPED_TOTAL.with_label_values(&["closed"]).inc();
                warn!("Event buffer closed, dropping trace event");
                false
            }
        }
    }

    /// Flush everything recorded so far
    pub async fn flush(&self) -> Result<FlushReport> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Flush(reply))
            .await
            .map_err(|_| TelemetryError::BufferClosed)?;
        response.await.map_err(|_| TelemetryError::BufferClosed)
    }

    pub async fn stats(&self) -> Result<BufferStats> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Stats(reply))
            .await
            .map_err(|_| TelemetryError::BufferClosed)?;
        let mut stats = response.await.map_err(|_| TelemetryError::BufferClosed)?;
        stats.recorded = self.recorded.load(Ordering::Relaxed);
        stats.dropped = self.dropped.load(Ordering::Relaxed);
        Ok(stats)
    }

    /// Final flush, then stop the flusher task and wait for it.
    ///
    /// A second call returns an empty report.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        let (reply, response) = oneshot::channel();
        let report = match self.sender.send(Command::Shutdown(reply)).await {
            Ok(()) => response.await.unwrap_or_default(),
            Err(_) => FlushReport::default(),
        };

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| TelemetryError::Internal(format!("flusher task failed: {}", e)))?;
            info!(events = report.events, delivered = report.delivered, "Event buffer stopped");
        }

        Ok(report)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct Flusher {
    buffer: Vec<TraceEvent>,
    config: BufferConfig,
    sink: Arc<dyn EventSink>,
    error_store: Arc<ErrorStore>,
    totals: BufferStats,
}

impl Flusher {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        let mut ticker = self.config.flush_interval().map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Record(event)) => self.push(event).await,
                    Some(Command::Flush(reply)) => {
                        let report = self.flush(FlushTrigger::Manual).await;
                        let _ = reply.send(report);
                    }
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Shutdown(reply)) => {
                        let report = self.drain_and_flush(&mut receiver).await;
                        let _ = reply.send(report);
                        break;
                    }
                    None => {
                        self.drain_and_flush(&mut receiver).await;
                        break;
                    }
                },
                _ = tick(&mut ticker) => {
                    self.flush(FlushTrigger::Timer).await;
                }
            }
        }

        debug!("Flusher task exiting");
    }

    async fn push(&mut self, event: TraceEvent) {
        self.buffer.push(event);
        if self.buffer.len() >= self.config.buffer_size {
            self.flush(FlushTrigger::BufferFull).await;
        }
    }

    fn stats(&self) -> BufferStats {
        BufferStats {
            buffered: self.buffer.len(),
            ..self.totals.clone()
        }
    }

    /// Close the channel, take whatever producers already queued, flush once
    async fn drain_and_flush(&mut self, receiver: &mut mpsc::Receiver<Command>) -> FlushReport {
        receiver.close();
        let mut report = FlushReport::default();

        while let Ok(command) = receiver.try_recv() {
            match command {
                Command::Record(event) => self.buffer.push(event),
                Command::Flush(reply) | Command::Shutdown(reply) => {
                    let _ = reply.send(FlushReport::default());
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
            }
        }

        report.merge(&self.flush(FlushTrigger::Shutdown).await);
        report
    }

    /// Swap the buffer out and deliver it in sub-batches
    async fn flush(&mut self, trigger: FlushTrigger) -> FlushReport {
        let batch = std::mem::take(&mut self.buffer);
        if batch.is_empty() {
            return FlushReport::default();
        }

        let start = Instant::now();
        let mut report = FlushReport {
            events: batch.len(),
            ..Default::default()
        };

        for chunk in batch.chunks(self.config.sub_batch_size.max(1)) {
            let outcome = self.deliver_sub_batch(chunk).await;
            report.merge(&outcome);
        }

        self.totals.flushes += 1;
        self.totals.delivered += report.delivered as u64;
        self.totals.failed += report.failed as u64;
        self.totals.skipped += report.skipped as u64;
        self.totals.disabled += report.disabled as u64;

        FLUSHES_TOTAL.with_label_values(&[trigger.as_str()]).inc();
        FLUSH_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());

        if report.failed > 0 || report.skipped > 0 {
            warn!(
                trigger = trigger.as_str(),
                events = report.events,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "Flush completed with undelivered events"
            );
        } else {
            debug!(
                trigger = trigger.as_str(),
                events = report.events,
                delivered = report.delivered,
                sub_batches = report.sub_batches,
                "Flush completed"
            );
        }

        report
    }

    /// Deliver one sub-batch: one trace's events in order, traces concurrently
    async fn deliver_sub_batch(&self, chunk: &[TraceEvent]) -> FlushReport {
        let mut groups: Vec<(&str, Vec<&TraceEvent>)> = Vec::new();
        for event in chunk {
            let trace_id = event.context.trace_id.as_str();
            match groups.iter_mut().find(|(id, _)| *id == trace_id) {
                Some((_, events)) => events.push(event),
                None => groups.push((trace_id, vec![event])),
            }
        }

        let sink = &self.sink;
        let deliveries = join_all(groups.into_iter().map(|(_, events)| async move {
            let mut outcomes = Vec::with_capacity(events.len());
            for event in events {
                outcomes.push(sink.deliver(event).await);
            }
            outcomes
        }))
        .await;

        let mut report = FlushReport {
            sub_batches: 1,
            ..Default::default()
        };
        let mut first_error = None;

        for delivery in deliveries.into_iter().flatten() {
            match delivery {
                Delivery::Delivered(_) => report.delivered += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Disabled => report.disabled += 1,
                Delivery::Failed(e) => {
                    report.failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        EVENTS_DELIVERED_TOTAL.inc_by(report.delivered as f64);
        for (reason, count) in [
            ("delivery_failed", report.failed),
            ("skipped", report.skipped),
            ("disabled", report.disabled),
        ] {
            if count > 0 {
                EVENTS_DROPPED_TOTAL.with_label_values(&[reason]).inc_by(count as f64);
            }
        }

        if let Some(e) = first_error {
            error!(
                failed = report.failed,
                size = chunk.len(),
                error = %e,
                "Sub-batch delivery failed, dropping events"
            );
            self.error_store.record_classified(
                e.to_string(),
                ErrorContext::new(ComponentKind::Database, "flush", e.kind())
                    .with_metadata("failed_events", report.failed.to_string())
                    .with_metadata("sub_batch_size", chunk.len().to_string()),
            );
        }

        report
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::models::{ErrorSeverity, EventLevel, TraceContext};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<TraceEvent>>,
        failure: Option<BackendError>,
    }

    impl RecordingSink {
        fn failing(error: BackendError) -> Self {
            Self {
                failure: Some(error),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: &TraceEvent) -> Delivery<String> {
            if let Some(error) = &self.failure {
                return Delivery::Failed(error.clone());
            }
            self.delivered.lock().push(event.clone());
            Delivery::Delivered(event.id.to_string())
        }
    }

    fn config(buffer_size: usize, flush_interval_ms: u64) -> BufferConfig {
        BufferConfig {
            buffer_size,
            flush_interval_ms,
            sub_batch_size: 2,
            channel_capacity: 100,
        }
    }

    fn event(trace_id: &str, name: &str) -> TraceEvent {
        TraceEvent::new(
            name,
            EventLevel::Info,
            ComponentKind::Tool,
            TraceContext::with_trace_id(trace_id),
            name,
        )
    }

    #[tokio::test]
    async fn test_manual_flush_delivers_everything() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = EventBuffer::start(config(100, 0), sink.clone(), Arc::new(ErrorStore::default()));

        for i in 0..5 {
            assert!(buffer.record(event("t", &format!("e{}", i))));
        }
        let report = buffer.flush().await.unwrap();

        assert_eq!(report.events, 5);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.sub_batches, 3);
        assert_eq!(sink.delivered.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_same_trace_delivered_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let mut config = config(100, 0);
        config.sub_batch_size = 10;
        let buffer = EventBuffer::start(config, sink.clone(), Arc::new(ErrorStore::default()));

        for name in ["started", "step", "completed"] {
            buffer.record(event("trace-a", name));
            buffer.record(event("trace-b", name));
        }
        buffer.flush().await.unwrap();

        let names: Vec<String> = sink
            .delivered
            .lock()
            .iter()
            .filter(|e| e.context.trace_id == "trace-a")
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(names, vec!["started", "step", "completed"]);
    }

    #[tokio::test]
    async fn test_timer_flush() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = EventBuffer::start(config(100, 20), sink.clone(), Arc::new(ErrorStore::default()));

        buffer.record(event("t", "e"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.delivered.lock().len(), 1);
        let stats = buffer.stats().await.unwrap();
        assert_eq!(stats.buffered, 0);
        assert_eq!(stats.flushes, 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_dropped_and_recorded() {
        let sink = Arc::new(RecordingSink::failing(BackendError::Connection(
            "refused".into(),
        )));
        let store = Arc::new(ErrorStore::default());
        let buffer = EventBuffer::start(config(100, 0), sink, store.clone());

        buffer.record(event("t", "a"));
        buffer.record(event("t", "b"));
        buffer.record(event("t", "c"));
        let report = buffer.flush().await.unwrap();

        assert_eq!(report.failed, 3);
        assert_eq!(report.sub_batches, 2);
        // One entry per failed sub-batch, component database
        assert_eq!(store.len(), 2);
        let errors = store.query(&Default::default());
        assert!(errors.iter().all(|e| e.context.component == ComponentKind::Database));

        // Nothing re-enqueued
        let again = buffer.flush().await.unwrap();
        assert_eq!(again.events, 0);
    }

    #[tokio::test]
    async fn test_connectivity_failures_are_recorded_as_critical() {
        let failures = [
            BackendError::Connection("connection refused".into()),
            BackendError::Timeout(Duration::from_millis(30)),
        ];

        for failure in failures {
            let sink = Arc::new(RecordingSink::failing(failure.clone()));
            let store = Arc::new(ErrorStore::default());
            let buffer = EventBuffer::start(config(100, 0), sink, store.clone());

            buffer.record(event("t", "a"));
            buffer.flush().await.unwrap();

            let errors = store.query(&Default::default());
            assert_eq!(errors.len(), 1, "{failure}");
            assert_eq!(errors[0].severity, ErrorSeverity::Critical, "{failure}");
            assert_eq!(errors[0].context.operation, "flush");
            assert_eq!(errors[0].context.error_kind, failure.kind());
            assert_eq!(errors[0].message, failure.to_string());
        }
    }

    #[tokio::test]
    async fn test_non_connectivity_failure_keeps_component_severity() {
        let sink = Arc::new(RecordingSink::failing(BackendError::Status {
            status: 400,
            body: "bad body".into(),
        }));
        let store = Arc::new(ErrorStore::default());
        let buffer = EventBuffer::start(config(100, 0), sink, store.clone());

        buffer.record(event("t", "a"));
        buffer.flush().await.unwrap();

        let errors = store.query(&Default::default());
        assert_eq!(errors[0].severity, ErrorSeverity::High);
    }

    #[tokio::test]
    async fn test_record_after_shutdown_is_refused() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = EventBuffer::start(config(100, 0), sink.clone(), Arc::new(ErrorStore::default()));

        buffer.record(event("t", "before"));
        let report = buffer.shutdown().await.unwrap();
        assert_eq!(report.delivered, 1);

        assert!(!buffer.record(event("t", "after")));
        assert!(buffer.is_closed());
        assert!(matches!(buffer.flush().await, Err(TelemetryError::BufferClosed)));
        assert_eq!(buffer.shutdown().await.unwrap(), FlushReport::default());
    }

    #[tokio::test]
    async fn test_full_channel_drops_events() {
        let sink = Arc::new(RecordingSink::default());
        let mut config = config(1000, 0);
        config.channel_capacity = 1;
        let buffer = EventBuffer::start(config, sink, Arc::new(ErrorStore::default()));

        let accepted = (0..50).filter(|_| buffer.record(event("t", "e"))).count();

        assert!(accepted < 50);
        let stats = buffer.stats().await.unwrap();
        assert_eq!(stats.recorded as usize, accepted);
        assert_eq!(stats.dropped as usize, 50 - accepted);
    }
}
