//! Business Anomaly Monitor
//!
//! Watches domain events (searches, bookings) rather than HTTP calls. Each
//! check compares the time since the last event against fixed thresholds and
//! consults the [`HealthView`] of the watched supplier to decide who is to
//! blame:
//!
//! | Condition                    | Supplier healthy              | Supplier not healthy |
//! |------------------------------|-------------------------------|----------------------|
//! | no search for `no_search_after`  | `UI_ISSUE`                | `NO_SEARCHES`        |
//! | no booking for `no_booking_after`| `LOW_CONVERSION` if searches since the last booking, else `UI_ISSUE` | `NO_BOOKINGS` |
//!
//! Independently, a conversion rate below `conversion_floor_pct` raises
//! `LOW_CONVERSION` once more than `min_searches_for_conversion` searches
//! were recorded. An alert kind is raised at most once per check.

use crate::alert::{Alert, AlertKind, Severity};
use crate::daemon::Daemon;
use crate::events::{EventBus, MonitorEvent};
use crate::metrics::HealthStatus;
use crate::policy::{AlertRepeatPolicy, BusinessPolicy};
use crate::watchdog::HealthView;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counters and clocks for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusinessStats {
    pub searches: u64,
    pub bookings: u64,
    pub revenue: f64,
    /// Bookings per search, in percent
    pub conversion_rate_pct: f64,
    pub last_search_at: DateTime<Utc>,
    pub last_booking_at: DateTime<Utc>,
    pub minutes_since_search: u64,
    pub minutes_since_booking: u64,
    pub search_threshold_breached: bool,
    pub booking_threshold_breached: bool,
    pub running: bool,
}

/// Which clock an alert belongs to, for once-per-episode suppression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Episode {
    Search,
    Booking,
    Conversion,
}

struct BusinessState {
    searches: u64,
    bookings: u64,
    revenue: f64,
    searches_since_booking: u64,
    last_search: Instant,
    last_booking: Instant,
    last_search_at: DateTime<Utc>,
    last_booking_at: DateTime<Utc>,
    alerted: HashSet<Episode>,
}

impl BusinessState {
    fn new() -> Self {
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            searches: 0,
            bookings: 0,
            revenue: 0.0,
            searches_since_booking: 0,
            last_search: now,
            last_booking: now,
            last_search_at: wall,
            last_booking_at: wall,
            alerted: HashSet::new(),
        }
    }

    fn conversion_rate_pct(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            self.bookings as f64 / self.searches as f64 * 100.0
        }
    }
}

struct MonitorInner {
    policy: BusinessPolicy,
    health: Arc<dyn HealthView>,
    bus: EventBus,
    state: Mutex<BusinessState>,
    daemon: Mutex<Option<Daemon>>,
}

/// Detects missing searches/bookings and low conversion.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct BusinessAnomalyMonitor {
    inner: Arc<MonitorInner>,
}

impl BusinessAnomalyMonitor {
    pub fn new(policy: BusinessPolicy, health: Arc<dyn HealthView>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                policy,
                health,
                bus,
                state: Mutex::new(BusinessState::new()),
                daemon: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> &BusinessPolicy {
        &self.inner.policy
    }

    pub fn record_search(&self) {
        let mut state = self.inner.state.lock();
        state.searches += 1;
        state.searches_since_booking += 1;
        state.last_search = Instant::now();
        state.last_search_at = Utc::now();
        state.alerted.remove(&Episode::Search);
    }

    pub fn record_booking(&self, revenue: f64) {
        let mut state = self.inner.state.lock();
        state.bookings += 1;
        state.revenue += revenue;
        state.searches_since_booking = 0;
        state.last_booking = Instant::now();
        state.last_booking_at = Utc::now();
        state.alerted.remove(&Episode::Booking);
        debug!(revenue, total_bookings = state.bookings, "Booking recorded");
    }

    /// Start periodic checks. The first check runs immediately.
    pub fn start(&self) {
        let mut daemon = self.inner.daemon.lock();
        if daemon.is_some() {
            warn!("Business monitor already running");
            return;
        }
        info!(
            "📈 Business monitor active | Check interval: {}m | Watching: {}",
            self.inner.policy.check_interval.as_secs() / 60,
            self.inner.policy.watched_dependency
        );

        let monitor = self.clone();
        *daemon = Some(Daemon::spawn(
            "business_monitor",
            self.inner.policy.check_interval,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.check_now();
                }
            },
        ));
    }

    pub fn stop(&self) {
        if let Some(daemon) = self.inner.daemon.lock().take() {
            daemon.stop();
            info!("Business monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .daemon
            .lock()
            .as_ref()
            .is_some_and(|d| !d.is_finished())
    }

    /// Run one check, publish the resulting alerts and return them
    pub fn check_now(&self) -> Vec<Alert> {
        let policy = &self.inner.policy;
        let dependency = policy.watched_dependency.as_str();
        let health = self.inner.health.health_status(dependency);
        let healthy = health == HealthStatus::Healthy;
        let now = Instant::now();

        let mut candidates: Vec<(Episode, Alert)> = Vec::new();
        let alerts = {
            let mut state = self.inner.state.lock();
            let since_search = now.duration_since(state.last_search);
            let since_booking = now.duration_since(state.last_booking);

            if since_search > policy.no_search_after {
                let alert = if healthy {
                    Alert::new(
                        AlertKind::UiIssue,
                        Severity::Critical,
                        format!(
                            "No searches for {} although {dependency} is healthy",
                            format_elapsed(since_search)
                        ),
                    )
                    .with_diagnosis("The supplier responds normally; the search UI may be broken")
                    .with_recommendation("Check the search form, frontend errors and recent deployments")
                } else {
                    Alert::new(
                        AlertKind::NoSearches,
                        Severity::Critical,
                        format!("No searches for {}", format_elapsed(since_search)),
                    )
                    .with_dependency(dependency)
                    .with_diagnosis(format!("{dependency} is {health}; searches are failing upstream"))
                    .with_recommendation("Check supplier status and recent supplier errors")
                };
                candidates.push((Episode::Search, alert));
            } else {
                state.alerted.remove(&Episode::Search);
            }

            if since_booking > policy.no_booking_after {
                let elapsed = format_elapsed(since_booking);
                let alert = if !healthy {
                    Alert::new(
                        AlertKind::NoBookings,
                        Severity::Critical,
                        format!("No bookings for {elapsed}"),
                    )
                    .with_dependency(dependency)
                    .with_diagnosis(format!("{dependency} is {health}; bookings cannot complete"))
                    .with_recommendation("Check supplier status and the booking endpoint")
                } else if state.searches_since_booking > 0 {
                    Alert::new(
                        AlertKind::LowConversion,
                        Severity::Warning,
                        format!(
                            "{} searches but no bookings for {elapsed}",
                            state.searches_since_booking
                        ),
                    )
                    .with_diagnosis("Users are searching but not booking")
                    .with_recommendation("Review prices, availability and the checkout flow")
                } else {
                    Alert::new(
                        AlertKind::UiIssue,
                        Severity::Critical,
                        format!("No bookings and no searches for {elapsed} although {dependency} is healthy"),
                    )
                    .with_diagnosis("The supplier responds normally but users are not reaching it")
                    .with_recommendation("Check that the site is reachable and the search UI works")
                };
                candidates.push((Episode::Booking, alert));
            } else {
                state.alerted.remove(&Episode::Booking);
            }

            let rate = state.conversion_rate_pct();
            if state.searches > policy.min_searches_for_conversion && rate < policy.conversion_floor_pct {
                candidates.push((
                    Episode::Conversion,
                    Alert::new(
                        AlertKind::LowConversion,
                        Severity::Warning,
                        format!(
                            "Conversion rate {rate:.2}% is below {:.2}% ({} bookings / {} searches)",
                            policy.conversion_floor_pct, state.bookings, state.searches
                        ),
                    )
                    .with_diagnosis("Users are searching but rarely booking")
                    .with_recommendation("Review prices, availability and the checkout flow"),
                ));
            } else {
                state.alerted.remove(&Episode::Conversion);
            }

            let mut kinds = HashSet::new();
            let mut alerts = Vec::new();
            for (episode, alert) in candidates {
                if policy.repeat == AlertRepeatPolicy::OncePerEpisode && !state.alerted.insert(episode) {
                    debug!(kind = %alert.kind, "Business alert already raised this episode");
                    continue;
                }
                if kinds.insert(alert.kind) {
                    alerts.push(alert);
                }
            }
            alerts
        };

        for alert in &alerts {
            self.inner.bus.publish(MonitorEvent::Alert(alert.clone()));
        }
        if alerts.is_empty() {
            debug!(health = %health, "📊 Business check clean");
        } else {
            warn!(alerts = alerts.len(), health = %health, "📊 Business check raised alerts");
        }
        alerts
    }

    pub fn stats(&self) -> BusinessStats {
        let policy = &self.inner.policy;
        let running = self.is_running();
        let state = self.inner.state.lock();
        let now = Instant::now();
        let since_search = now.duration_since(state.last_search);
        let since_booking = now.duration_since(state.last_booking);

        BusinessStats {
            searches: state.searches,
            bookings: state.bookings,
            revenue: state.revenue,
            conversion_rate_pct: state.conversion_rate_pct(),
            last_search_at: state.last_search_at,
            last_booking_at: state.last_booking_at,
            minutes_since_search: since_search.as_secs() / 60,
            minutes_since_booking: since_booking.as_secs() / 60,
            search_threshold_breached: since_search > policy.no_search_after,
            booking_threshold_breached: since_booking > policy.no_booking_after,
            running,
        }
    }

    /// Zero the counters and restart both clocks from now
    pub fn reset(&self) {
        *self.inner.state.lock() = BusinessState::new();
        info!("Business monitor reset");
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let minutes = elapsed.as_secs() / 60;
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}
