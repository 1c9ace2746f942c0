/*!
 * Wires the gateway and the sentinel monitors together from a config
 */

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use waypoint_sentinel::{
    ApprovalWorkflow, BusinessAnomalyMonitor, EventBus, FanoutChannel, HealthWatchdog, LogChannel,
    LogSink, NotificationChannel, NotificationForwarder, PulseProbe,
};

use crate::config::{NotificationConfig, WaypointConfig};
use crate::error::Result;
use crate::gateway::SupplierGateway;

/// Every long-lived component of a running Waypoint instance
pub struct Services {
    pub bus: EventBus,
    pub channel: Arc<dyn NotificationChannel>,
    pub approvals: ApprovalWorkflow,
    pub watchdog: HealthWatchdog,
    pub business: BusinessAnomalyMonitor,
    pub gateway: SupplierGateway,
    notification_timeout: std::time::Duration,
    subscribers: Vec<JoinHandle<()>>,
}

impl Services {
    /// Build with the notification channels named in the config
    pub fn from_config(config: &WaypointConfig) -> Result<Self> {
        let channel = build_channel(&config.notification)?;
        Self::with_channel(config, channel)
    }

    /// Build around an already constructed notification channel
    pub fn with_channel(
        config: &WaypointConfig,
        channel: Arc<dyn NotificationChannel>,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::default();
        let approvals = ApprovalWorkflow::new(config.approval.clone(), channel.clone())
            .with_event_bus(bus.clone());
        let watchdog = HealthWatchdog::new(config.watchdog.clone(), bus.clone())
            .with_approvals(approvals.clone());
        let business = BusinessAnomalyMonitor::new(
            config.business.clone(),
            Arc::new(watchdog.clone()),
            bus.clone(),
        );
        let gateway = SupplierGateway::new(config.defaults, watchdog.clone(), business.clone());

        for dependency in &config.dependencies {
            let probe = match &dependency.probe_url {
                Some(url) => build_probe(url)?,
                None => None,
            };
            watchdog.register(dependency.name.as_str(), probe);
            gateway.register(&dependency.name, dependency.guard_settings(&config.defaults));
        }

        Ok(Self {
            bus,
            channel,
            approvals,
            watchdog,
            business,
            gateway,
            notification_timeout: config.notification.timeout,
            subscribers: Vec::new(),
        })
    }

    /// Subscribe the log sink and alert forwarder, then start both monitors
    pub fn start(&mut self) {
        if !self.subscribers.is_empty() {
            warn!("Services already started");
            return;
        }

        self.subscribers.push(LogSink::spawn(&self.bus));
        self.subscribers.push(NotificationForwarder::spawn(
            &self.bus,
            self.channel.clone(),
            self.notification_timeout,
        ));
        self.watchdog.start();
        self.business.start();

        info!(
            dependencies = self.gateway.dependencies().len(),
            subscribers = self.bus.subscriber_count(),
            "🚀 Waypoint services started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.watchdog.is_running() && self.business.is_running()
    }

    /// Stop the monitors and every subscriber task
    pub fn shutdown(mut self) {
        self.watchdog.stop();
        self.business.stop();
        for handle in self.subscribers.drain(..) {
            handle.abort();
        }
        info!("Waypoint services stopped");
    }
}

/// Log channel and/or Telegram behind one fan-out
pub fn build_channel(config: &NotificationConfig) -> Result<Arc<dyn NotificationChannel>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if config.log {
        channels.push(Arc::new(LogChannel));
    }

    if let Some(telegram) = &config.telegram {
        channels.push(telegram_channel(telegram)?);
    }

    if channels.is_empty() {
        warn!("No notification channel configured; alerts reach the log sink only");
    }
    Ok(Arc::new(FanoutChannel::new(channels, config.timeout)))
}

#[cfg(feature = "http")]
fn telegram_channel(
    config: &crate::config::TelegramConfig,
) -> Result<Arc<dyn NotificationChannel>> {
    let mut channel = waypoint_sentinel::TelegramChannel::new(
        config.bot_token.as_str(),
        config.chat_id.as_str(),
    )?;
    if let Some(api_base) = &config.api_base {
        channel = channel.with_api_base(api_base.as_str());
    }
    Ok(Arc::new(channel))
}

#[cfg(not(feature = "http"))]
fn telegram_channel(
    _config: &crate::config::TelegramConfig,
) -> Result<Arc<dyn NotificationChannel>> {
    Err(crate::error::WaypointError::Config(
        "Telegram notifications need the `http` feature".to_string(),
    ))
}

#[cfg(feature = "http")]
fn build_probe(url: &str) -> Result<Option<Arc<dyn PulseProbe>>> {
    Ok(Some(Arc::new(waypoint_sentinel::HttpProbe::new(url)?)))
}

#[cfg(not(feature = "http"))]
fn build_probe(url: &str) -> Result<Option<Arc<dyn PulseProbe>>> {
    warn!(url, "HTTP probes need the `http` feature; dependency is not pulsed");
    Ok(None)
}
