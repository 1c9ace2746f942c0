//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! supplier is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Supplier is unhealthy, requests fail immediately
//! - HalfOpen: Exactly one trial request tests whether the supplier recovered
//!
//! The breaker sees only the final outcome of a call. When it wraps a
//! [`RetryingExecutor`](crate::RetryingExecutor), a call that needed three
//! retries before failing counts as one failure.

use super::error::ResilienceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately until `next_attempt_at`
    Open { next_attempt_at: Instant },
    /// Circuit is half-open, one trial request is allowed through
    HalfOpen,
}

impl CircuitState {
    /// Short label for logs and dashboards
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open { .. } => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    #[serde(with = "crate::serde_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub next_attempt_at: Option<Instant>,
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    /// Set while the single half-open trial call is running
    trial_in_flight: bool,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            trial_in_flight: false,
        }
    }

    fn open(&mut self, name: &str, config: &CircuitBreakerConfig) {
        let next_attempt_at = Instant::now() + config.reset_timeout;
        self.state = CircuitState::Open { next_attempt_at };
        self.trial_in_flight = false;
        error!(
            dependency = %name,
            failures = self.failure_count,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker OPEN"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker protecting one dependency.
///
/// Cloning is cheap and clones share state.
///
/// # Example
/// ```no_run
/// use waypoint_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new("solvex", CircuitBreakerConfig::default());
///
///     let result = breaker.call(|| async {
///         Ok::<_, ResilienceError>(42)
///     }).await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a breaker for the named dependency
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Dependency this breaker protects
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Get the current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// State, failure count and next attempt time in one consistent read
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            next_attempt_at: match state.state {
                CircuitState::Open { next_attempt_at } => Some(next_attempt_at),
                _ => None,
            },
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = CircuitBreakerState::new();
        info!(dependency = %self.name, "Circuit breaker RESET");
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = op().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(),
            Err(e) if e.should_trip_breaker() => self.on_failure(e),
            Err(_) => self.on_inconclusive(admission),
        }

        result
    }

    /// Decide whether a call may proceed, moving OPEN to HALF_OPEN when due
    fn admit(&self) -> Result<Admission, ResilienceError> {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open { next_attempt_at } => {
                if Instant::now() >= next_attempt_at {
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    warn!(dependency = %self.name, "Circuit breaker HALF_OPEN, admitting trial call");
                    Ok(Admission::Trial)
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Err(self.open_error())
                } else {
                    state.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn open_error(&self) -> ResilienceError {
        ResilienceError::CircuitOpen {
            dependency: self.name.to_string(),
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.trial_in_flight = false;
                info!(dependency = %self.name, "Circuit breaker CLOSED");
            }
            CircuitState::Open { .. } => {
                // A call admitted before the circuit opened finished late;
                // the open decision stands.
            }
        }
    }

    fn on_failure(&self, error: &ResilienceError) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                warn!(
                    dependency = %self.name,
                    failures = state.failure_count,
                    threshold = self.config.failure_threshold,
                    error = %error,
                    "Circuit breaker recorded failure"
                );
                if state.failure_count >= self.config.failure_threshold {
                    state.open(&self.name, &self.config);
                }
            }
            CircuitState::HalfOpen => {
                state.failure_count += 1;
                state.open(&self.name, &self.config);
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// A client-side failure says nothing about supplier health. During a
    /// trial it frees the slot so the next call can probe instead.
    fn on_inconclusive(&self, admission: Admission) {
        if admission == Admission::Trial {
            let mut state = self.state.lock();
            if state.state == CircuitState::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }
}

/// Re-opens the circuit if a trial call is dropped before it finishes
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.breaker.state.lock();
            if state.state == CircuitState::HalfOpen {
                warn!(dependency = %self.breaker.name, "Trial call cancelled");
                state.open(&self.breaker.name, &self.breaker.config);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "solvex",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_millis(reset_ms),
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ResilienceError> {
        breaker
            .call(|| async { Err(ResilienceError::from_status(500, "down")) })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(5, 60_000);
        for _ in 0..5 {
            assert!(fail(&breaker).await.is_err());
        }

        assert!(matches!(breaker.state(), CircuitState::Open { .. }));

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError>(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = breaker(2, 1000);
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        tokio::time::advance(Duration::from_millis(1000)).await;

        let result = breaker.call(|| async { Ok::<_, ResilienceError>(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.next_attempt_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_new_deadline() {
        let breaker = breaker(1, 1000);
        fail(&breaker).await.ok();
        let first = breaker.snapshot().next_attempt_at.unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(matches!(fail(&breaker).await, Err(ResilienceError::Server { .. })));

        let second = breaker.snapshot().next_attempt_at.unwrap();
        assert!(second > first);
        assert_eq!(second, Instant::now() + Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_admitted() {
        let breaker = breaker(1, 100);
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(move || async move {
                    release_rx.await.ok();
                    Ok::<_, ResilienceError>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let concurrent = breaker.call(|| async { Ok::<_, ResilienceError>(()) }).await;
        assert!(matches!(concurrent, Err(ResilienceError::CircuitOpen { .. })));

        release_tx.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_reopens() {
        let breaker = breaker(1, 100);
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_millis(100)).await;

        let pending = breaker.call(|| std::future::pending::<Result<(), ResilienceError>>());
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_do_not_count() {
        let breaker = breaker(2, 1000);
        for _ in 0..5 {
            let _: Result<(), _> = breaker
                .call(|| async { Err(ResilienceError::from_status(400, "bad request")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count_when_closed() {
        let breaker = breaker(3, 1000);
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.failure_count(), 2);

        breaker.call(|| async { Ok::<_, ResilienceError>(()) }).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);

        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let breaker = breaker(1, 60_000);
        fail(&breaker).await.ok();
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }
}
