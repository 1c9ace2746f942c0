//! Health Watchdog: periodic pulse probing and error bookkeeping
//!
//! Every `pulse_interval` the watchdog probes each registered dependency,
//! classifies the result as healthy / degraded / down and appends it to a
//! bounded history. Independently, failed calls are reported through
//! [`HealthWatchdog::handle_error`], which counts failures per
//! `(dependency, status)` and escalates:
//!
//! ```text
//! 401 × unauthorized_threshold ──> TOKEN_REFRESH_REQUIRED alert
//! 5xx × error_threshold ─────────> approval request ──> maintenance mode
//! any × error_threshold ─────────> HTTP_<code> alert (diagnosis + recommendation)
//! ```
//!
//! Maintenance mode lifts itself after `maintenance_timeout`. While a
//! dependency is in maintenance, dispatch layers short-circuit calls to it.

use crate::alert::{diagnose_status, recommend_for_status, Alert, AlertKind, Severity};
use crate::approval::{ActionType, ApprovalRequest, ApprovalWorkflow};
use crate::daemon::Daemon;
use crate::events::{EventBus, MonitorEvent};
use crate::metrics::{HealthStats, HealthStatus, PulseHistory, PulseSample};
use crate::policy::WatchdogPolicy;
use crate::probe::PulseProbe;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Read-only health answer consulted by other monitors
pub trait HealthView: Send + Sync {
    /// Current classification; `Down` when nothing is known
    fn health_status(&self, dependency: &str) -> HealthStatus;
}

/// Identifies an in-flight request started with [`HealthWatchdog::start_request`]
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyStatus {
    pub status: HealthStatus,
    pub in_maintenance: bool,
    pub stats: Option<HealthStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceInfo {
    pub dependency: String,
    pub since: DateTime<Utc>,
    pub reason: String,
}

/// Snapshot for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub running: bool,
    pub dependencies: BTreeMap<String, DependencyStatus>,
    pub maintenance: Vec<MaintenanceInfo>,
    /// Keyed `<dependency>-<status>`
    pub error_counts: BTreeMap<String, u32>,
    pub active_requests: usize,
}

struct DependencyEntry {
    probe: Option<Arc<dyn PulseProbe>>,
    history: PulseHistory,
}

struct MaintenanceEntry {
    since: DateTime<Utc>,
    reason: String,
    /// Distinguishes this window from later ones so a stale expiry timer is ignored
    epoch: u64,
}

struct ActiveRequest {
    dependency: String,
    started: Instant,
}

#[derive(Default)]
struct WatchdogState {
    dependencies: BTreeMap<String, DependencyEntry>,
    error_counts: HashMap<(String, u16), u32>,
    maintenance: BTreeMap<String, MaintenanceEntry>,
    /// Dependencies with a maintenance approval in flight, keyed to the
    /// epoch the request was made in
    maintenance_requests: HashMap<String, u64>,
    last_alert: HashMap<String, Instant>,
    active_requests: HashMap<RequestId, ActiveRequest>,
    next_request_id: RequestId,
    epoch: u64,
}

impl WatchdogState {
    fn entry(&mut self, dependency: &str, history_len: usize) -> &mut DependencyEntry {
        self.dependencies
            .entry(dependency.to_string())
            .or_insert_with(|| DependencyEntry {
                probe: None,
                history: PulseHistory::new(history_len),
            })
    }

    fn clear_errors(&mut self, dependency: &str) {
        self.error_counts.retain(|(dep, _), _| dep != dependency);
    }
}

struct WatchdogInner {
    policy: WatchdogPolicy,
    bus: EventBus,
    state: Mutex<WatchdogState>,
    daemon: Mutex<Option<Daemon>>,
}

/// Pulse prober and error bookkeeper for supplier dependencies.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct HealthWatchdog {
    inner: Arc<WatchdogInner>,
    approvals: Option<ApprovalWorkflow>,
}

impl HealthWatchdog {
    pub fn new(policy: WatchdogPolicy, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                policy,
                bus,
                state: Mutex::new(WatchdogState::default()),
                daemon: Mutex::new(None),
            }),
            approvals: None,
        }
    }

    /// Ask a human before enabling maintenance mode. Without an approval
    /// workflow, maintenance is enabled as soon as the threshold is reached.
    /// Call before [`start`](Self::start).
    pub fn with_approvals(mut self, approvals: ApprovalWorkflow) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn policy(&self) -> &WatchdogPolicy {
        &self.inner.policy
    }

    /// Register a dependency, optionally with a probe for periodic pulses.
    /// Re-registering replaces the probe and keeps the history.
    pub fn register(&self, dependency: impl Into<String>, probe: Option<Arc<dyn PulseProbe>>) {
        let dependency = dependency.into();
        let mut state = self.inner.state.lock();
        state.entry(&dependency, self.inner.policy.history_len).probe = probe;
        debug!(dependency = %dependency, "Dependency registered with watchdog");
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.inner.state.lock().dependencies.keys().cloned().collect()
    }

    /// Start periodic pulses. The first pulse runs immediately.
    pub fn start(&self) {
        let mut daemon = self.inner.daemon.lock();
        if daemon.is_some() {
            warn!("Health watchdog already running");
            return;
        }

        info!(
            "🛡️  Health watchdog active | Pulse interval: {}s | Dependencies: {}",
            self.inner.policy.pulse_interval.as_secs(),
            self.inner.state.lock().dependencies.len()
        );

        let watchdog = self.clone();
        *daemon = Some(Daemon::spawn(
            "health_watchdog",
            self.inner.policy.pulse_interval,
            move || {
                let watchdog = watchdog.clone();
                async move {
                    watchdog.check_now().await;
                }
            },
        ));
    }

    pub fn stop(&self) {
        if let Some(daemon) = self.inner.daemon.lock().take() {
            daemon.stop();
            info!("Health watchdog stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .daemon
            .lock()
            .as_ref()
            .is_some_and(|d| !d.is_finished())
    }

    /// Run one pulse cycle over every dependency that has a probe
    pub async fn check_now(&self) -> Vec<(String, PulseSample)> {
        let probes: Vec<(String, Arc<dyn PulseProbe>)> = {
            let state = self.inner.state.lock();
            state
                .dependencies
                .iter()
                .filter_map(|(name, entry)| entry.probe.clone().map(|p| (name.clone(), p)))
                .collect()
        };

        debug!(dependencies = probes.len(), "💓 Running pulse check");
        let results = join_all(probes.into_iter().map(|(dependency, probe)| async move {
            let sample = self.pulse(probe.as_ref()).await;
            (dependency, sample)
        }))
        .await;

        for (dependency, sample) in &results {
            self.record_sample(dependency, sample.clone());
            if let Some(code) = sample.status_code.filter(|c| !(200..300).contains(c)) {
                self.handle_error(dependency, code, sample.error.as_deref());
            }
        }
        results
    }

    async fn pulse(&self, probe: &dyn PulseProbe) -> PulseSample {
        let timeout = self.inner.policy.probe_timeout;
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, probe.probe()).await;
        let latency = start.elapsed();
        let latency_ms = latency.as_millis() as u64;

        match outcome {
            Ok(Ok(code)) => {
                let sample = PulseSample::new(self.classify(Some(code), latency), latency_ms, Some(code));
                if (200..300).contains(&code) {
                    sample
                } else {
                    sample.with_error(format!("HTTP {code}"))
                }
            }
            Ok(Err(e)) => PulseSample::new(HealthStatus::Down, latency_ms, None).with_error(e.to_string()),
            Err(_) => PulseSample::new(HealthStatus::Down, latency_ms, None)
                .with_error(format!("probe timed out after {}ms", timeout.as_millis())),
        }
    }

    /// Classify a probe result: non-2xx or no response is `Down`; a
    /// successful but slow response is `Degraded`
    pub fn classify(&self, status_code: Option<u16>, latency: Duration) -> HealthStatus {
        match status_code {
            Some(200..=299) if latency > self.inner.policy.latency_threshold => HealthStatus::Degraded,
            Some(200..=299) => HealthStatus::Healthy,
            _ => HealthStatus::Down,
        }
    }

    /// Append a sample to a dependency's history and publish it
    pub fn record_sample(&self, dependency: &str, sample: PulseSample) {
        {
            let mut state = self.inner.state.lock();
            state
                .entry(dependency, self.inner.policy.history_len)
                .history
                .push(sample.clone());
            if sample.status == HealthStatus::Healthy {
                state.clear_errors(dependency);
            }
        }

        let slow = sample.status_code.is_some_and(|c| (200..300).contains(&c))
            && Duration::from_millis(sample.latency_ms) > self.inner.policy.critical_latency;

        self.inner.bus.publish(MonitorEvent::Pulse {
            dependency: dependency.to_string(),
            sample: sample.clone(),
        });

        if slow {
            self.raise_high_latency(dependency, sample.latency_ms);
        }
    }

    /// Count a failed call and escalate once thresholds are reached.
    /// Returns the updated count for `(dependency, status_code)`.
    pub fn handle_error(&self, dependency: &str, status_code: u16, error: Option<&str>) -> u32 {
        let count = {
            let mut state = self.inner.state.lock();
            let count = state
                .error_counts
                .entry((dependency.to_string(), status_code))
                .or_insert(0);
            *count += 1;
            *count
        };

        warn!(
            dependency,
            status_code,
            count,
            error = error.unwrap_or("-"),
            "❌ Supplier error recorded"
        );

        let policy = &self.inner.policy;

        if status_code == 401 && count >= policy.unauthorized_threshold {
            self.raise(
                Alert::new(
                    AlertKind::TokenRefreshRequired,
                    Severity::Critical,
                    format!("{count} consecutive 401 responses from {dependency}"),
                )
                .with_dependency(dependency)
                .with_diagnosis(diagnose_status(401, error))
                .with_recommendation(recommend_for_status(401)),
            );
        }

        if (500..600).contains(&status_code) && count >= policy.error_threshold {
            self.request_maintenance(
                dependency,
                format!("{count} × HTTP {status_code} from {dependency}"),
            );
        }

        if count >= policy.error_threshold {
            let severity = if status_code >= 500 {
                Severity::Critical
            } else {
                Severity::Warning
            };
            self.raise(
                Alert::new(
                    AlertKind::HttpStatus(status_code),
                    severity,
                    format!("{dependency} returned HTTP {status_code} {count} times"),
                )
                .with_dependency(dependency)
                .with_diagnosis(diagnose_status(status_code, error))
                .with_recommendation(recommend_for_status(status_code)),
            );
        }

        count
    }

    /// Report a failure that has no HTTP status (counted as 500)
    pub fn report_failure(&self, service: &str, error: &str) -> u32 {
        self.handle_error(service, 500, Some(error))
    }

    pub fn error_count(&self, dependency: &str, status_code: u16) -> u32 {
        self.inner
            .state
            .lock()
            .error_counts
            .get(&(dependency.to_string(), status_code))
            .copied()
            .unwrap_or(0)
    }

    /// Begin timing a live request against `dependency`
    pub fn start_request(&self, dependency: &str) -> RequestId {
        let mut state = self.inner.state.lock();
        state.next_request_id += 1;
        let id = state.next_request_id;
        state.active_requests.insert(
            id,
            ActiveRequest {
                dependency: dependency.to_string(),
                started: Instant::now(),
            },
        );
        id
    }

    /// Finish a request started with [`start_request`](Self::start_request).
    /// Slow successes raise latency alerts; failures are counted as 500s.
    /// Returns the measured latency, or `None` for an unknown id.
    pub fn end_request(&self, id: RequestId, success: bool, error: Option<&str>) -> Option<Duration> {
        let request = self.inner.state.lock().active_requests.remove(&id)?;
        let latency = request.started.elapsed();

        if success {
            if latency > self.inner.policy.latency_threshold {
                warn!(
                    dependency = %request.dependency,
                    latency_ms = latency.as_millis() as u64,
                    "🐢 Slow supplier response"
                );
            }
            if latency > self.inner.policy.critical_latency {
                self.raise_high_latency(&request.dependency, latency.as_millis() as u64);
            }
        } else {
            self.handle_error(&request.dependency, 500, error);
        }

        Some(latency)
    }

    /// Finish a failed request with the status the supplier answered
    pub fn fail_request(
        &self,
        id: RequestId,
        status_code: u16,
        error: Option<&str>,
    ) -> Option<Duration> {
        let request = self.inner.state.lock().active_requests.remove(&id)?;
        self.handle_error(&request.dependency, status_code, error);
        Some(request.started.elapsed())
    }

    /// Forget a request that never reached the supplier
    pub fn abandon_request(&self, id: RequestId) -> bool {
        self.inner.state.lock().active_requests.remove(&id).is_some()
    }

    fn raise_high_latency(&self, dependency: &str, latency_ms: u64) {
        self.raise(
            Alert::new(
                AlertKind::HighLatency,
                Severity::Warning,
                format!("{dependency} responded in {latency_ms}ms"),
            )
            .with_dependency(dependency)
            .with_diagnosis("The supplier is responding slowly")
            .with_recommendation("Monitor response times; consider raising timeouts"),
        );
    }

    fn request_maintenance(&self, dependency: &str, reason: String) {
        let runtime = tokio::runtime::Handle::try_current();
        let (Some(approvals), Ok(runtime)) = (&self.approvals, runtime) else {
            if !self.is_in_maintenance(dependency) {
                self.enable_maintenance(dependency, &reason);
            }
            return;
        };

        let token = {
            let mut state = self.inner.state.lock();
            if state.maintenance.contains_key(dependency)
                || state.maintenance_requests.contains_key(dependency)
            {
                return;
            }
            state.epoch += 1;
            let token = state.epoch;
            state.maintenance_requests.insert(dependency.to_string(), token);
            token
        };

        let watchdog = self.clone();
        let approvals = approvals.clone();
        let dependency = dependency.to_string();
        let deadline = self.inner.policy.approval_timeout;
        runtime.spawn(async move {
            let request = ApprovalRequest::new(ActionType::MaintenanceMode, &dependency, &reason)
                .auto_execute_after(deadline);
            let proceed = approvals.request_approval(request).await;

            let current = {
                let mut state = watchdog.inner.state.lock();
                let current = state.maintenance_requests.get(&dependency) == Some(&token);
                if current {
                    state.maintenance_requests.remove(&dependency);
                }
                current
            };
            if !current {
                debug!(dependency = %dependency, "Stale maintenance approval dropped");
            } else if proceed {
                watchdog.enable_maintenance(&dependency, &reason);
            } else {
                info!(dependency = %dependency, "Maintenance request rejected by operator");
            }
        });
    }

    /// Put `dependency` into maintenance mode for `maintenance_timeout`
    pub fn enable_maintenance(&self, dependency: &str, reason: &str) {
        let epoch = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            let epoch = state.epoch;
            state.maintenance.insert(
                dependency.to_string(),
                MaintenanceEntry {
                    since: Utc::now(),
                    reason: reason.to_string(),
                    epoch,
                },
            );
            epoch
        };

        let timeout = self.inner.policy.maintenance_timeout;
        self.inner.bus.publish(MonitorEvent::MaintenanceChanged {
            dependency: dependency.to_string(),
            enabled: true,
        });
        self.raise(
            Alert::new(
                AlertKind::MaintenanceMode,
                Severity::Critical,
                format!(
                    "{dependency} placed in maintenance mode for {} min",
                    timeout.as_secs() / 60
                ),
            )
            .with_dependency(dependency)
            .with_diagnosis(reason)
            .with_recommendation("Calls are short-circuited until the window ends"),
        );

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let watchdog = self.clone();
            let dependency = dependency.to_string();
            runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                watchdog.expire_maintenance(&dependency, epoch);
            });
        }
    }

    fn expire_maintenance(&self, dependency: &str, epoch: u64) {
        let expired = {
            let mut state = self.inner.state.lock();
            let current = state
                .maintenance
                .get(dependency)
                .is_some_and(|entry| entry.epoch == epoch);
            if current {
                state.maintenance.remove(dependency);
                state.clear_errors(dependency);
            }
            current
        };

        if expired {
            info!(dependency, "Maintenance window elapsed");
            self.inner.bus.publish(MonitorEvent::MaintenanceChanged {
                dependency: dependency.to_string(),
                enabled: false,
            });
        }
    }

    /// Lift maintenance mode. Returns `false` if it was not enabled.
    pub fn disable_maintenance(&self, dependency: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.maintenance.remove(dependency).is_some();
            if removed {
                state.clear_errors(dependency);
            }
            removed
        };
        if removed {
            self.inner.bus.publish(MonitorEvent::MaintenanceChanged {
                dependency: dependency.to_string(),
                enabled: false,
            });
        }
        removed
    }

    pub fn is_in_maintenance(&self, dependency: &str) -> bool {
        self.inner.state.lock().maintenance.contains_key(dependency)
    }

    /// Stats over the most recent `stats_window` samples
    pub fn health_stats(&self, dependency: &str) -> Option<HealthStats> {
        let state = self.inner.state.lock();
        let entry = state.dependencies.get(dependency)?;
        HealthStats::from_samples(entry.history.recent(self.inner.policy.stats_window))
    }

    pub fn history(&self, dependency: &str) -> Vec<PulseSample> {
        self.inner
            .state
            .lock()
            .dependencies
            .get(dependency)
            .map(|e| e.history.to_vec())
            .unwrap_or_default()
    }

    pub fn status(&self) -> WatchdogStatus {
        let running = self.is_running();
        let state = self.inner.state.lock();
        let window = self.inner.policy.stats_window;

        let dependencies = state
            .dependencies
            .iter()
            .map(|(name, entry)| {
                let in_maintenance = state.maintenance.contains_key(name);
                let status = if in_maintenance {
                    HealthStatus::Down
                } else {
                    entry
                        .history
                        .latest()
                        .map(|s| s.status)
                        .unwrap_or(HealthStatus::Down)
                };
                (
                    name.clone(),
                    DependencyStatus {
                        status,
                        in_maintenance,
                        stats: HealthStats::from_samples(entry.history.recent(window)),
                    },
                )
            })
            .collect();

        WatchdogStatus {
            running,
            dependencies,
            maintenance: state
                .maintenance
                .iter()
                .map(|(name, entry)| MaintenanceInfo {
                    dependency: name.clone(),
                    since: entry.since,
                    reason: entry.reason.clone(),
                })
                .collect(),
            error_counts: state
                .error_counts
                .iter()
                .map(|((dep, code), count)| (format!("{dep}-{code}"), *count))
                .collect(),
            active_requests: state.active_requests.len(),
        }
    }

    /// Clear history, error counts, alert cooldowns, in-flight requests and
    /// maintenance mode. Maintenance approvals still pending are ignored when
    /// they resolve. Registrations and the running loop are kept.
    pub fn reset(&self) {
        let lifted: Vec<String> = {
            let mut state = self.inner.state.lock();
            for entry in state.dependencies.values_mut() {
                entry.history.clear();
            }
            state.error_counts.clear();
            state.maintenance_requests.clear();
            state.last_alert.clear();
            state.active_requests.clear();
            let lifted = state.maintenance.keys().cloned().collect();
            state.maintenance.clear();
            lifted
        };

        for dependency in lifted {
            self.inner.bus.publish(MonitorEvent::MaintenanceChanged {
                dependency,
                enabled: false,
            });
        }
        info!("Health watchdog reset");
    }

    /// Publish `alert` unless one with the same key went out within the cooldown
    fn raise(&self, alert: Alert) -> bool {
        let key = alert.key();
        {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            if let Some(last) = state.last_alert.get(&key) {
                if now.duration_since(*last) < self.inner.policy.alert_cooldown {
                    debug!(key = %key, "Alert suppressed by cooldown");
                    return false;
                }
            }
            state.last_alert.insert(key, now);
        }
        self.inner.bus.publish(MonitorEvent::Alert(alert));
        true
    }
}

impl HealthView for HealthWatchdog {
    fn health_status(&self, dependency: &str) -> HealthStatus {
        let state = self.inner.state.lock();
        if state.maintenance.contains_key(dependency) {
            return HealthStatus::Down;
        }
        state
            .dependencies
            .get(dependency)
            .and_then(|e| e.history.latest())
            .map(|s| s.status)
            .unwrap_or(HealthStatus::Down)
    }
}
