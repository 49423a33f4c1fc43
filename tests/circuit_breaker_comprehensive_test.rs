// Circuit breaker suite: state transitions, skip semantics, concurrency

use agent_telemetry::circuit_breaker::{
    BreakerOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn breaker(name: &str, threshold: u32, recovery_ms: u64) -> CircuitBreaker {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .recovery_timeout(Duration::from_millis(recovery_ms))
        .build()
        .unwrap();
    CircuitBreaker::new(name, config)
}

async fn fail(cb: &CircuitBreaker) {
    let result = cb
        .execute("fail", || async {
            Err::<i32, std::io::Error>(std::io::Error::new(std::io::ErrorKind::Other, "error"))
        })
        .await;
    assert!(result.is_err() || matches!(result, Ok(BreakerOutcome::Skipped)));
}

// ============================================================================
// STATE TRANSITIONS
// ============================================================================

#[tokio::test]
async fn test_circuit_breaker_starts_closed() {
    let cb = CircuitBreaker::new("starts_closed", CircuitBreakerConfig::default());

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().failures, 0);
}

#[tokio::test]
async fn test_successful_call_stays_closed() {
    let cb = breaker("success", 3, 1_000);

    let result = cb
        .execute("ok", || async { Ok::<i32, std::io::Error>(42) })
        .await
        .unwrap();

    assert_eq!(result, BreakerOutcome::Executed(42));
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_failures() {
    let cb = breaker("opens", 3, 1_000);

    fail(&cb).await;
    fail(&cb).await;
    assert_eq!(cb.state(), CircuitBreakerState::Closed);

    fail(&cb).await;
    assert_eq!(cb.state(), CircuitBreakerState::Open);
}

#[tokio::test]
async fn test_operation_error_is_returned_unchanged() {
    let cb = breaker("passthrough", 5, 1_000);

    let err = cb
        .execute("fail", || async {
            Err::<(), std::io::Error>(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "nope",
            ))
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
    assert_eq!(err.to_string(), "nope");
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let cb = breaker("reset_on_success", 3, 1_000);

    fail(&cb).await;
    fail(&cb).await;
    cb.execute("ok", || async { Ok::<(), std::io::Error>(()) })
        .await
        .unwrap();
    fail(&cb).await;
    fail(&cb).await;

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().failures, 2);
}

// ============================================================================
// SKIP SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_open_circuit_skips_without_invoking() {
    let cb = breaker("skips", 2, 60_000);
    fail(&cb).await;
    fail(&cb).await;

    let invoked = AtomicUsize::new(0);
    let outcome = cb
        .execute("ok", || async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<i32, std::io::Error>(1)
        })
        .await
        .unwrap();

    assert!(outcome.is_skipped());
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_skipped_calls_do_not_touch_counters() {
    let cb = breaker("skip_counters", 2, 60_000);
    fail(&cb).await;
    fail(&cb).await;
    let before = cb.stats();

    for _ in 0..5 {
        let outcome = cb
            .execute("ok", || async { Ok::<(), std::io::Error>(()) })
            .await
            .unwrap();
        assert!(outcome.is_skipped());
    }

    let after = cb.stats();
    assert_eq!(after.failures, before.failures);
    assert_eq!(after.transition_count, before.transition_count);
}

#[tokio::test]
async fn test_threshold_two_scenario() {
    let cb = breaker("scenario", 2, 100);
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let _ = cb
            .execute("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "down"))
            })
            .await;
    }

    let third = cb
        .execute("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), std::io::Error>(())
        })
        .await
        .unwrap();
    assert!(third.is_skipped());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    sleep(Duration::from_millis(150)).await;

    let fourth = cb
        .execute("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), std::io::Error>(())
        })
        .await
        .unwrap();
    assert_eq!(fourth, BreakerOutcome::Executed(()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

// ============================================================================
// RECOVERY
// ============================================================================

#[tokio::test]
async fn test_half_open_success_closes() {
    let cb = breaker("half_open_close", 2, 100);
    fail(&cb).await;
    fail(&cb).await;

    sleep(Duration::from_millis(150)).await;
    cb.execute("probe", || async { Ok::<(), std::io::Error>(()) })
        .await
        .unwrap();

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().failures, 0);
}

#[tokio::test]
async fn test_half_open_failure_reopens() {
    let cb = breaker("half_open_reopen", 2, 100);
    fail(&cb).await;
    fail(&cb).await;
    let first_failure = cb.stats().last_failure_at.unwrap();

    sleep(Duration::from_millis(150)).await;
    fail(&cb).await;

    let stats = cb.stats();
    assert_eq!(stats.state, CircuitBreakerState::Open);
    assert!(stats.last_failure_at.unwrap() > first_failure);

    // Cool-down restarts from the probe failure
    let outcome = cb
        .execute("ok", || async { Ok::<(), std::io::Error>(()) })
        .await
        .unwrap();
    assert!(outcome.is_skipped());
}

#[tokio::test]
async fn test_manual_reset() {
    let cb = breaker("manual_reset", 1, 60_000);
    fail(&cb).await;
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    cb.reset();

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().failures, 0);
    let outcome = cb
        .execute("ok", || async { Ok::<i32, std::io::Error>(7) })
        .await
        .unwrap();
    assert_eq!(outcome.into_option(), Some(7));
}

#[tokio::test]
async fn test_force_open() {
    let cb = breaker("force_open", 5, 60_000);
    cb.force_open();

    assert_eq!(cb.state(), CircuitBreakerState::Open);
    let outcome = cb
        .execute("ok", || async { Ok::<(), std::io::Error>(()) })
        .await
        .unwrap();
    assert!(outcome.is_skipped());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_open_once() {
    let cb = Arc::new(breaker("concurrent", 5, 60_000));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let cb = Arc::clone(&cb);
            tokio::spawn(async move { fail(&cb).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = cb.stats();
    assert_eq!(stats.state, CircuitBreakerState::Open);
    // Closed -> Open exactly once
    assert_eq!(stats.transition_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_half_open_admits_single_probe() {
    let cb = Arc::new(breaker("single_probe", 1, 50));
    fail(&cb).await;
    sleep(Duration::from_millis(80)).await;

    let invoked = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cb = Arc::clone(&cb);
            let invoked = Arc::clone(&invoked);
            tokio::spawn(async move {
                cb.execute("probe", || async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    Ok::<(), std::io::Error>(())
                })
                .await
                .unwrap()
            })
        })
        .collect();

    let mut skipped = 0;
    for handle in handles {
        if handle.await.unwrap().is_skipped() {
            skipped += 1;
        }
    }

    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(skipped, 9);
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}
