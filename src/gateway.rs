/*!
 * Supplier gateway: the single path for outbound supplier calls
 *
 * Each call passes through, in order:
 *
 * ```text
 * maintenance check ─> rate limiter ─> request queue ─> circuit breaker ─> retrying executor
 * ```
 *
 * Failures that reach the supplier are reported to the health watchdog once,
 * after retries are exhausted. Local refusals (maintenance, rate limit, open
 * circuit, full queue) are returned to the caller and never counted.
 */

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use waypoint_core_resilience::{
    BatchConfig, BatchLoader, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, QueueConfig,
    QueueStats, RateLimitConfig, RateLimiter, RequestQueue, ResilienceError, RetryPolicy,
    RetryingExecutor,
};
use waypoint_sentinel::{BusinessAnomalyMonitor, HealthWatchdog, RequestId};

/// Protection settings for one dependency
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
}

/// Domain event recorded when a tagged call succeeds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusinessEvent {
    Search,
    Booking { revenue: f64 },
}

/// Describes one outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    dependency: String,
    deadline: Option<Duration>,
    event: Option<BusinessEvent>,
}

impl Operation {
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            deadline: None,
            event: None,
        }
    }

    /// Per-attempt timeout overriding the dependency's retry policy
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn business_event(mut self, event: BusinessEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }
}

/// Breaker, executor and queue owned by one dependency
pub struct DependencyGuard {
    name: String,
    settings: GuardSettings,
    breaker: CircuitBreaker,
    executor: RetryingExecutor,
    queue: RequestQueue,
}

impl DependencyGuard {
    fn new(name: &str, settings: GuardSettings) -> Self {
        let dependency = name.to_string();
        let executor =
            RetryingExecutor::new(settings.retry).with_observer(move |attempt, error| {
                debug!(dependency = %dependency, attempt, error = %error, "Supplier call retry");
            });

        Self {
            name: name.to_string(),
            settings,
            breaker: CircuitBreaker::new(name, settings.breaker),
            executor,
            queue: RequestQueue::new(settings.queue),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

struct GatewayInner {
    defaults: GuardSettings,
    limiter: RateLimiter,
    guards: RwLock<HashMap<String, Arc<DependencyGuard>>>,
    watchdog: HealthWatchdog,
    business: BusinessAnomalyMonitor,
}

/// Entry point for every outbound supplier call.
///
/// Cloning is cheap and clones share guards, limiter and monitors.
#[derive(Clone)]
pub struct SupplierGateway {
    inner: Arc<GatewayInner>,
}

impl SupplierGateway {
    pub fn new(
        defaults: GuardSettings,
        watchdog: HealthWatchdog,
        business: BusinessAnomalyMonitor,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                defaults,
                limiter: RateLimiter::new(defaults.rate_limit),
                guards: RwLock::new(HashMap::new()),
                watchdog,
                business,
            }),
        }
    }

    /// Register `dependency` with its own settings, replacing any earlier guard
    pub fn register(&self, dependency: &str, settings: GuardSettings) -> Arc<DependencyGuard> {
        self.inner
            .limiter
            .register_limit(dependency, settings.rate_limit);
        let guard = Arc::new(DependencyGuard::new(dependency, settings));
        self.inner
            .guards
            .write()
            .insert(dependency.to_string(), guard.clone());
        info!(
            dependency,
            rate_limit = settings.rate_limit.max_requests,
            concurrency = settings.queue.concurrency,
            breaker_threshold = settings.breaker.failure_threshold,
            "Supplier guard registered"
        );
        guard
    }

    /// Guard for `dependency`, created with the default settings on first use
    pub fn guard(&self, dependency: &str) -> Arc<DependencyGuard> {
        if let Some(guard) = self.inner.guards.read().get(dependency) {
            return guard.clone();
        }
        self.inner
            .guards
            .write()
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(DependencyGuard::new(dependency, self.inner.defaults)))
            .clone()
    }

    pub fn dependencies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.guards.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn watchdog(&self) -> &HealthWatchdog {
        &self.inner.watchdog
    }

    pub fn business(&self) -> &BusinessAnomalyMonitor {
        &self.inner.business
    }

    /// Call `dependency` with its default deadline and no business event
    pub async fn call<F, Fut, T>(&self, dependency: &str, op: F) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(Operation::new(dependency), op).await
    }

    /// Run `op` through the full protection stack for `operation`.
    ///
    /// `op` is invoked once per attempt.
    pub async fn execute<F, Fut, T>(&self, operation: Operation, op: F) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
        T: Send + 'static,
    {
        let watchdog = &self.inner.watchdog;
        let dependency = operation.dependency.as_str();

        if watchdog.is_in_maintenance(dependency) {
            debug!(dependency, "🚧 Call short-circuited: maintenance mode");
            return Err(ResilienceError::Maintenance {
                dependency: dependency.to_string(),
            });
        }
        self.inner.limiter.check(dependency)?;

        let guard = self.guard(dependency);
        let attempt_timeout = operation
            .deadline
            .unwrap_or(guard.settings.retry.attempt_timeout);
        let request = InFlight {
            watchdog: watchdog.clone(),
            id: Some(watchdog.start_request(dependency)),
        };

        let dispatch = {
            let guard = guard.clone();
            let watchdog = watchdog.clone();
            async move {
                // maintenance may have started while the call was queued
                if watchdog.is_in_maintenance(&guard.name) {
                    return Err(ResilienceError::Maintenance {
                        dependency: guard.name.clone(),
                    });
                }
                guard
                    .breaker
                    .call(|| guard.executor.execute_with_timeout(attempt_timeout, op))
                    .await
            }
        };
        let result = guard.queue.submit(dispatch).await;

        self.settle(request, &operation, &result);
        result
    }

    /// Batch loader for `dependency`; every flushed batch is one gateway call
    pub fn batch_loader<K, V, F, Fut>(&self, dependency: &str, batch_fn: F) -> BatchLoader<K, V>
    where
        K: Clone + Send + Sync + 'static,
        V: Send + 'static,
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, ResilienceError>> + Send + 'static,
    {
        let config = self.guard(dependency).settings.batch;
        let gateway = self.clone();
        let dependency = dependency.to_string();
        let batch_fn = Arc::new(batch_fn);

        BatchLoader::new(config, move |keys: Vec<K>| {
            let gateway = gateway.clone();
            let batch_fn = batch_fn.clone();
            let operation = Operation::new(dependency.clone());
            async move {
                gateway
                    .execute(operation, move || (*batch_fn)(keys.clone()))
                    .await
            }
        })
    }

    fn settle<T>(
        &self,
        mut request: InFlight,
        operation: &Operation,
        result: &Result<T, ResilienceError>,
    ) {
        let Some(request) = request.id.take() else {
            return;
        };
        let watchdog = &self.inner.watchdog;
        match result {
            Ok(_) => {
                watchdog.end_request(request, true, None);
                match operation.event {
                    Some(BusinessEvent::Search) => self.inner.business.record_search(),
                    Some(BusinessEvent::Booking { revenue }) => {
                        self.inner.business.record_booking(revenue)
                    }
                    None => {}
                }
            }
            Err(err) => match reported_status(err) {
                Some(status) => {
                    watchdog.fail_request(request, status, Some(&err.to_string()));
                }
                None => {
                    watchdog.abandon_request(request);
                    debug!(
                        dependency = %operation.dependency,
                        error = %err,
                        "Call refused before reaching supplier"
                    );
                }
            },
        }
    }
}

/// Watchdog request that is abandoned unless settled, so a dropped call
/// future does not stay active forever
struct InFlight {
    watchdog: HealthWatchdog,
    id: Option<RequestId>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.watchdog.abandon_request(id);
            debug!(request = id, "Supplier call cancelled by caller");
        }
    }
}

/// Status to report for a failure that reached the supplier; `None` for
/// local refusals
fn reported_status(err: &ResilienceError) -> Option<u16> {
    match err {
        ResilienceError::Server { status, .. } | ResilienceError::Client { status, .. } => {
            Some(*status)
        }
        ResilienceError::TransientNetwork(_)
        | ResilienceError::Timeout(_)
        | ResilienceError::BatchMismatch { .. } => match err.status_code() {
            0 => Some(500),
            status => Some(status),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_err;
    use waypoint_core_resilience::CircuitState;
    use waypoint_sentinel::testing::StaticHealth;
    use waypoint_sentinel::{BusinessPolicy, EventBus, HealthStatus, WatchdogPolicy};

    fn gateway(settings: GuardSettings) -> SupplierGateway {
        let bus = EventBus::new(64);
        let watchdog = HealthWatchdog::new(WatchdogPolicy::default(), bus.clone());
        let health = StaticHealth::new().with("supplier", HealthStatus::Healthy);
        let business = BusinessAnomalyMonitor::new(BusinessPolicy::default(), Arc::new(health), bus);
        let gateway = SupplierGateway::new(GuardSettings::default(), watchdog, business);
        gateway.register("solvex", settings);
        gateway
    }

    fn fast_retries(max_retries: u32) -> GuardSettings {
        GuardSettings {
            retry: RetryPolicy {
                max_retries,
                initial_delay: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn counting(
        calls: &Arc<AtomicU32>,
        outcome: std::result::Result<&'static str, ResilienceError>,
    ) -> impl Fn() -> futures::future::Ready<std::result::Result<&'static str, ResilienceError>>
           + Send
           + Sync
           + 'static {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(outcome.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_business_event() {
        let gateway = gateway(fast_retries(3));
        let calls = Arc::new(AtomicU32::new(0));

        let result = gateway
            .execute(
                Operation::new("solvex").business_event(BusinessEvent::Search),
                counting(&calls, Ok("hotels")),
            )
            .await;
        assert_eq!(result, Ok("hotels"));

        gateway
            .execute(
                Operation::new("solvex").business_event(BusinessEvent::Booking { revenue: 420.0 }),
                counting(&calls, Ok("booked")),
            )
            .await
            .unwrap();

        let stats = gateway.business().stats();
        assert_eq!(stats.searches, 1);
        assert_eq!(stats.bookings, 1);
        assert_eq!(stats.revenue, 420.0);
        assert_eq!(gateway.watchdog().status().active_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_reported_once() {
        let gateway = gateway(fast_retries(3));
        let calls = Arc::new(AtomicU32::new(0));

        let result = gateway
            .call(
                "solvex",
                counting(&calls, Err(ResilienceError::from_status(503, "unavailable"))),
            )
            .await;

        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(gateway.watchdog().error_count("solvex", 503), 1);
        assert_eq!(gateway.guard("solvex").breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let gateway = gateway(fast_retries(3));
        let calls = Arc::new(AtomicU32::new(0));

        let result = gateway
            .call(
                "solvex",
                counting(&calls, Err(ResilienceError::from_status(401, "token expired"))),
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Client { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.watchdog().error_count("solvex", 401), 1);
        assert_eq!(gateway.guard("solvex").breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_short_circuits() {
        let gateway = gateway(fast_retries(3));
        let calls = Arc::new(AtomicU32::new(0));
        gateway
            .watchdog()
            .enable_maintenance("solvex", "operator request");

        let result = gateway.call("solvex", counting(&calls, Ok("hotels"))).await;

        assert!(matches!(result, Err(ResilienceError::Maintenance { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.guard("solvex").breaker().failure_count(), 0);
        assert_eq!(gateway.watchdog().status().active_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_before_queue() {
        let gateway = gateway(GuardSettings {
            rate_limit: RateLimitConfig::per_minute(2),
            ..fast_retries(0)
        });
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            gateway
                .call("solvex", counting(&calls, Ok("hotels")))
                .await
                .unwrap();
        }
        let third = gateway.call("solvex", counting(&calls, Ok("hotels"))).await;

        assert!(matches!(
            third,
            Err(ResilienceError::RateLimitExceeded { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(gateway
            .call("solvex", counting(&calls, Ok("hotels")))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_not_reported() {
        let gateway = gateway(GuardSettings {
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            },
            ..fast_retries(0)
        });
        let calls = Arc::new(AtomicU32::new(0));
        let failing = || counting(&calls, Err(ResilienceError::from_status(500, "boom")));

        for _ in 0..2 {
            assert_err!(gateway.call("solvex", failing()).await);
        }
        assert!(matches!(
            gateway.guard("solvex").circuit().state,
            CircuitState::Open { .. }
        ));

        let rejected = gateway.call("solvex", failing()).await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.watchdog().error_count("solvex", 500), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_deadline_overrides_policy() {
        let gateway = gateway(fast_retries(0));

        let result = gateway
            .execute(
                Operation::new("solvex").deadline(Duration::from_secs(1)),
                || async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<_, ResilienceError>(())
                },
            )
            .await;

        assert_eq!(result, Err(ResilienceError::Timeout(Duration::from_secs(1))));
        assert_eq!(gateway.watchdog().error_count("solvex", 504), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_is_not_left_active() {
        let gateway = gateway(fast_retries(0));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            gateway.call("solvex", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ResilienceError>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::advance(Duration::from_secs(20)).await;
        let status = gateway.watchdog().status();
        assert_eq!(status.active_requests, 0);
        assert!(status.error_counts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_dependency_uses_defaults() {
        let gateway = gateway(fast_retries(0));
        assert_eq!(gateway.dependencies(), vec!["solvex".to_string()]);

        let result = gateway
            .call("opengreece", || async { Ok::<_, ResilienceError>(7) })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(
            gateway.guard("opengreece").settings(),
            &GuardSettings::default()
        );
        assert_eq!(gateway.dependencies().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_loader_goes_through_gateway() {
        let gateway = gateway(fast_retries(0));
        let batches = Arc::new(AtomicU32::new(0));
        let counter = batches.clone();

        let loader = gateway.batch_loader("solvex", move |ids: Vec<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ids.into_iter().map(|id| id * 10).collect::<Vec<_>>()) }
        });

        let (a, b, c) = tokio::join!(loader.load(1), loader.load(2), loader.load(3));

        assert_eq!((a, b, c), (Ok(10), Ok(20), Ok(30)));
        assert_eq!(batches.load(Ordering::SeqCst), 1);
    }
}
