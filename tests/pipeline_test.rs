// Buffer, flusher and backend delivery through the assembled pipeline

mod common;

use agent_telemetry::backend::BackendError;
use agent_telemetry::circuit_breaker::CircuitBreakerState;
use agent_telemetry::error_store::ErrorQuery;
use agent_telemetry::models::ComponentKind;
use common::{event, memory_pipeline, test_config};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_buffer_size_three_flushes_twice() {
    let mut config = test_config();
    config.buffer.buffer_size = 3;
    let (pipeline, backend) = memory_pipeline(config);

    let events: Vec<_> = (1..=5).map(|i| event(&format!("trace-{}", i), "step")).collect();
    let ids: Vec<String> = events.iter().map(|e| e.id.to_string()).collect();
    for event in events {
        assert!(pipeline.buffer().record(event));
    }

    // Stats is answered after the buffer-full flush of the first three
    let stats = pipeline.buffer().stats().await.unwrap();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.buffered, 2);
    let first: HashSet<String> = backend.events().into_iter().map(|e| e.id).collect();
    assert_eq!(first, ids[..3].iter().cloned().collect());

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.events, 2);
    assert_eq!(report.delivered, 2);

    let all: HashSet<String> = backend.events().into_iter().map(|e| e.id).collect();
    assert_eq!(all, ids.iter().cloned().collect());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_event_flushed_exactly_once() {
    const N: usize = 250;
    let mut config = test_config();
    config.buffer.buffer_size = 7;
    config.buffer.sub_batch_size = 3;
    config.buffer.flush_interval_ms = 5;
    let (pipeline, backend) = memory_pipeline(config);

    let mut expected = HashSet::new();
    for i in 0..N {
        let event = event(&format!("trace-{}", i % 13), "step");
        expected.insert(event.id.to_string());
        assert!(pipeline.buffer().record(event));
        if i % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }
    pipeline.shutdown().await.unwrap();

    let delivered: Vec<String> = backend.events().into_iter().map(|e| e.id).collect();
    let unique: HashSet<String> = delivered.iter().cloned().collect();
    assert_eq!(delivered.len(), N);
    assert_eq!(unique, expected);
}

#[tokio::test]
async fn test_events_of_one_trace_keep_order() {
    let mut config = test_config();
    config.buffer.sub_batch_size = 10;
    let (pipeline, backend) = memory_pipeline(config);

    for name in ["trace_started", "tool_call", "trace_completed"] {
        pipeline.buffer().record(event("trace-a", name));
        pipeline.buffer().record(event("trace-b", name));
    }
    pipeline.shutdown().await.unwrap();

    let order: Vec<String> = backend
        .events()
        .into_iter()
        .filter(|e| e.trace_id == "trace-a")
        .map(|e| e.name)
        .collect();
    assert_eq!(order, vec!["trace_started", "tool_call", "trace_completed"]);
}

#[tokio::test]
async fn test_unreachable_backend_drops_and_records() {
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 2;
    config.buffer.sub_batch_size = 2;
    let (pipeline, backend) = memory_pipeline(config);
    backend.fail_with(BackendError::Connection("connection refused".to_string()));

    for i in 0..6 {
        pipeline.buffer().record(event(&format!("trace-{}", i), "step"));
    }
    let report = pipeline.buffer().flush().await.unwrap();

    assert_eq!(report.events, 6);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed + report.skipped, 6);
    assert!(report.skipped > 0);
    assert_eq!(
        pipeline.client().breaker().state(),
        CircuitBreakerState::Open
    );

    let recorded = pipeline
        .error_store()
        .query(&ErrorQuery::default().component(ComponentKind::Database));
    assert!(!recorded.is_empty());

    // Nothing was re-enqueued
    assert_eq!(pipeline.buffer().flush().await.unwrap().events, 0);

    // Shutdown completes even with the backend down
    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .expect("shutdown must not hang")
        .unwrap();
}

#[tokio::test]
async fn test_hung_backend_is_bounded_by_request_timeout() {
    let mut config = test_config();
    config.backend.request_timeout_ms = 30;
    config.circuit_breaker.failure_threshold = 1;
    let (pipeline, backend) = memory_pipeline(config);
    backend.set_delay(Some(Duration::from_secs(10)));

    pipeline.buffer().record(event("trace-1", "step"));
    let report = tokio::time::timeout(Duration::from_secs(2), pipeline.buffer().flush())
        .await
        .expect("flush bounded by per-call deadline")
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(
        pipeline.client().breaker().state(),
        CircuitBreakerState::Open
    );
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_backend_accepts_and_discards() {
    let mut config = test_config();
    config.backend.endpoint = None;
    let (pipeline, backend) = memory_pipeline(config);

    pipeline.buffer().record(event("trace-1", "step"));
    let report = pipeline.shutdown().await.unwrap();

    assert_eq!(report.events, 1);
    assert_eq!(report.disabled, 1);
    assert_eq!(backend.call_count(), 0);
    assert!(!pipeline.client().is_enabled());
}

#[tokio::test]
async fn test_health_check_through_pipeline() {
    let (pipeline, backend) = memory_pipeline(test_config());

    let healthy = pipeline.client().health_check().await;
    assert!(healthy.healthy);

    backend.fail_with(BackendError::Status {
        status: 503,
        body: "unavailable".to_string(),
    });
    let unhealthy = pipeline.client().health_check().await;
    assert!(!unhealthy.healthy);
    assert!(unhealthy.error.unwrap().contains("503"));

    pipeline.shutdown().await.unwrap();
}
