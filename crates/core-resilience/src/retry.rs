//! Retry logic with per-attempt timeout and exponential backoff
//!
//! Every attempt is bounded by `attempt_timeout`; an attempt that overruns is
//! dropped (cancelled) and counted as [`ResilienceError::Timeout`]. Transient
//! failures are retried up to `max_retries` times with delays of `D, 2D, 4D, ...`
//! capped at `max_delay`. Permanent failures propagate immediately.

use super::error::ResilienceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "crate::serde_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    /// Multiplier applied after each retry
    pub multiplier: f64,
    /// Hard timeout for each attempt
    #[serde(with = "crate::serde_millis")]
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // overflow, infinity and NaN all fall back to the cap
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Callback invoked before every retry with the retry number and its cause
pub type RetryObserver = Arc<dyn Fn(u32, &ResilienceError) + Send + Sync>;

/// Wraps one asynchronous operation with timeout, bounded retry and backoff.
///
/// # Example
/// ```no_run
/// use waypoint_core_resilience::{RetryingExecutor, RetryPolicy, ResilienceError};
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let executor = RetryingExecutor::new(RetryPolicy::default())
///     .with_observer(|attempt, err| eprintln!("retry {attempt}: {err}"));
///
/// let hotels = executor
///     .execute(|| async { Ok::<_, ResilienceError>(vec!["Filos"]) })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
    observer: Option<RetryObserver>,
}

impl fmt::Debug for RetryingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("policy", &self.policy)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RetryingExecutor {
    /// Create an executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: None,
        }
    }

    /// Install a retry observer
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &ResilienceError) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// The active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` under the policy
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.execute_with_timeout(self.policy.attempt_timeout, op)
            .await
    }

    /// Run `op` with an explicit per-attempt timeout instead of the policy's
    pub async fn execute_with_timeout<F, Fut, T>(
        &self,
        attempt_timeout: Duration,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut retry = 0;

        loop {
            let outcome = match tokio::time::timeout(attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ResilienceError::Timeout(attempt_timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    if retry > 0 {
                        debug!(retries = retry, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(error = %err, "Non-retryable failure");
                return Err(err);
            }

            if retry >= self.policy.max_retries {
                warn!(
                    attempts = retry + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            retry += 1;
            let delay = self.policy.delay_for(retry);
            warn!(
                attempt = retry,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            if let Some(observer) = &self.observer {
                observer(retry, &err);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32, delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(delay_ms),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_with_doubling_delays() {
        let attempts = Arc::new(AtomicU32::new(0));
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let executor = RetryingExecutor::new(policy(3, 1000));

        let start = Instant::now();
        let result: Result<(), _> = executor
            .execute(|| {
                let attempts = attempts.clone();
                let stamps = stamps.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    stamps.lock().push(start.elapsed());
                    Err(ResilienceError::from_status(500, "boom"))
                }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Server { status: 500, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        let stamps = stamps.lock().clone();
        let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryingExecutor::new(policy(5, 10));

        let result: Result<(), _> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::from_status(404, "no such hotel"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_permanent());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_retryable_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryingExecutor::new(RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(100),
            ..Default::default()
        });

        let result = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<_, ResilienceError>(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_retry() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let executor = RetryingExecutor::new(policy(2, 1)).with_observer(move |attempt, err| {
            seen_clone.lock().push((attempt, err.status_code()));
        });

        let _: Result<(), _> = executor
            .execute(|| async { Err(ResilienceError::from_status(503, "down")) })
            .await;

        assert_eq!(*seen.lock(), vec![(1, 503), (2, 503)]);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(25),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(25));
    }

    #[test]
    fn test_delay_saturates_at_cap() {
        let policy = RetryPolicy {
            max_retries: 100,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(70), policy.max_delay);
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);

        let nan = RetryPolicy {
            multiplier: f64::NAN,
            ..Default::default()
        };
        assert_eq!(nan.delay_for(2), nan.max_delay);
    }
}
