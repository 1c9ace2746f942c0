//! One-way event bus between detectors and their consumers
//!
//! The watchdog, the business monitor and the approval workflow publish
//! [`MonitorEvent`]s; logging, notification and dashboards subscribe
//! independently. Publishers never know who is listening.

use crate::alert::{Alert, Severity};
use crate::approval::ApprovalAction;
use crate::metrics::{HealthStatus, PulseSample};
use crate::notification::{deliver, Notification, NotificationChannel};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Alert(Alert),
    Pulse {
        dependency: String,
        sample: PulseSample,
    },
    MaintenanceChanged {
        dependency: String,
        enabled: bool,
    },
    ApprovalResolved(ApprovalAction),
}

/// Broadcast bus. Cloning is cheap and clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// `capacity` is how far a slow subscriber may fall behind before it
    /// starts losing events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber. Returns the number reached.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Drain `rx`, handing each event to `handle`, until the bus closes
async fn consume<F, Fut>(name: &'static str, mut rx: broadcast::Receiver<MonitorEvent>, mut handle: F)
where
    F: FnMut(MonitorEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        match rx.recv().await {
            Ok(event) => handle(event).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(subscriber = name, skipped, "Event subscriber lagged, events dropped");
            }
            Err(RecvError::Closed) => {
                debug!(subscriber = name, "Event bus closed");
                return;
            }
        }
    }
}

/// Writes every event to the tracing log
pub struct LogSink;

impl LogSink {
    pub fn spawn(bus: &EventBus) -> JoinHandle<()> {
        let rx = bus.subscribe();
        tokio::spawn(consume("log_sink", rx, |event| async move {
            log_event(&event);
        }))
    }
}

/// Log one event at a level matching its importance
pub fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Alert(alert) => {
            let dependency = alert.dependency.as_deref().unwrap_or("global");
            match alert.severity {
                Severity::Critical => error!(
                    alert_id = %alert.id,
                    kind = %alert.kind,
                    dependency,
                    diagnosis = %alert.diagnosis,
                    "🚨 {}",
                    alert.message
                ),
                Severity::Warning => warn!(
                    alert_id = %alert.id,
                    kind = %alert.kind,
                    dependency,
                    "⚠️  {}",
                    alert.message
                ),
                Severity::Info => info!(alert_id = %alert.id, kind = %alert.kind, dependency, "{}", alert.message),
            }
        }
        MonitorEvent::Pulse { dependency, sample } => match sample.status {
            HealthStatus::Healthy => debug!(
                dependency = %dependency,
                latency_ms = sample.latency_ms,
                "💓 Pulse healthy"
            ),
            HealthStatus::Degraded => warn!(
                dependency = %dependency,
                latency_ms = sample.latency_ms,
                "🐢 Pulse degraded"
            ),
            HealthStatus::Down => error!(
                dependency = %dependency,
                status_code = sample.status_code,
                error = sample.error.as_deref().unwrap_or("-"),
                "💀 Pulse down"
            ),
        },
        MonitorEvent::MaintenanceChanged { dependency, enabled } => {
            if *enabled {
                warn!(dependency = %dependency, "🔧 Maintenance mode enabled");
            } else {
                info!(dependency = %dependency, "✅ Maintenance mode lifted");
            }
        }
        MonitorEvent::ApprovalResolved(action) => info!(
            action_id = %action.id,
            action = %action.action_type,
            endpoint = %action.endpoint,
            status = ?action.status,
            "Approval resolved"
        ),
    }
}

/// Forwards alerts to a notification channel
pub struct NotificationForwarder;

impl NotificationForwarder {
    pub fn spawn(
        bus: &EventBus,
        channel: Arc<dyn NotificationChannel>,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let rx = bus.subscribe();
        tokio::spawn(consume("notification_forwarder", rx, move |event| {
            let channel = channel.clone();
            async move {
                if let MonitorEvent::Alert(alert) = event {
                    let notification = Notification::text(alert.to_markdown());
                    deliver(channel.as_ref(), &notification, timeout).await;
                }
            }
        }))
    }
}
