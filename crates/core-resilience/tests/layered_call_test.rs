//! Breaker + retry composition: the breaker only sees post-retry outcomes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use waypoint_core_resilience::prelude::*;

fn stack(threshold: u32, retries: u32) -> (CircuitBreaker, RetryingExecutor) {
    let breaker = CircuitBreaker::new(
        "tct",
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(30),
        },
    );
    let executor = RetryingExecutor::new(RetryPolicy {
        max_retries: retries,
        initial_delay: Duration::from_millis(100),
        ..Default::default()
    });
    (breaker, executor)
}

#[tokio::test(start_paused = true)]
async fn test_retries_do_not_inflate_failure_count() {
    let (breaker, executor) = stack(5, 3);
    let attempts = Arc::new(AtomicU32::new(0));

    let result: Result<(), _> = breaker
        .call(|| {
            executor.execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::from_status(500, "internal"))
                }
            })
        })
        .await;

    assert_err!(result);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_blip_absorbed_by_retry() {
    let (breaker, executor) = stack(1, 2);
    let attempts = Arc::new(AtomicU32::new(0));

    let result = breaker
        .call(|| {
            executor.execute(|| {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ResilienceError::TransientNetwork("connection reset".into()))
                    } else {
                        Ok("availability")
                    }
                }
            })
        })
        .await;

    assert_eq!(assert_ok!(result), "availability");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_skips_retries_entirely() {
    let (breaker, executor) = stack(1, 3);
    let attempts = Arc::new(AtomicU32::new(0));

    let failing = || {
        executor.execute(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ResilienceError::from_status(503, "unavailable"))
            }
        })
    };

    assert_err!(breaker.call(failing).await);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let second = breaker.call(failing).await;
    assert!(matches!(second, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_requests_never_reach_queue() {
    let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_secs(60)));
    let queue = RequestQueue::new(QueueConfig::default());

    let mut admitted = Vec::new();
    for i in 0..3 {
        match limiter.check("opengreece") {
            Ok(()) => admitted.push(queue.submit(async move { Ok::<_, ResilienceError>(i) })),
            Err(err) => assert!(matches!(err, ResilienceError::RateLimitExceeded { .. })),
        }
    }

    let results = futures::future::join_all(admitted).await;
    assert_eq!(results.len(), 2);
}
