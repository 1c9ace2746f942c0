//! Waypoint Sentinel: autonomous supplier monitoring
//!
//! The Sentinel watches the travel suppliers Waypoint depends on and the
//! business traffic flowing through them. It escalates to a human when a
//! corrective action is needed, and acts on its own when nobody answers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   pulses, errors   ┌──────────────────┐
//! │  HealthWatchdog  │───────────────────>│                  │
//! └───┬──────────▲───┘                    │                  │──> LogSink
//!     │          │ HealthView             │     EventBus     │
//!     │   ┌──────┴──────────────┐ alerts  │   (broadcast)    │──> NotificationForwarder
//!     │   │ BusinessAnomaly     │────────>│                  │        │
//!     │   │ Monitor             │         │                  │        ▼
//!     │   └─────────────────────┘         └────────▲─────────┘  NotificationChannel
//!     │ maintenance request                        │ resolved         ▲
//!     ▼                                            │                  │
//! ┌──────────────────┐  approve / reject / postpone│                  │
//! │ ApprovalWorkflow │─────────────────────────────┴──────────────────┘
//! └──────────────────┘  (auto-executes at the deadline)
//! ```
//!
//! Detectors only publish; logging and notification subscribe. Nothing in
//! the publishing path depends on a subscriber being healthy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypoint_sentinel::{
//!     ApprovalPolicy, ApprovalWorkflow, BusinessAnomalyMonitor, BusinessPolicy, EventBus,
//!     HealthWatchdog, LogChannel, LogSink, WatchdogPolicy,
//! };
//!
//! # async fn example() {
//! let bus = EventBus::default();
//! LogSink::spawn(&bus);
//!
//! let approvals = ApprovalWorkflow::new(ApprovalPolicy::default(), Arc::new(LogChannel))
//!     .with_event_bus(bus.clone());
//! let watchdog = HealthWatchdog::new(WatchdogPolicy::default(), bus.clone())
//!     .with_approvals(approvals.clone());
//! watchdog.register("supplier", None);
//!
//! let business =
//!     BusinessAnomalyMonitor::new(BusinessPolicy::default(), Arc::new(watchdog.clone()), bus);
//!
//! watchdog.start();
//! business.start();
//! # }
//! ```

pub mod alert;
pub mod approval;
pub mod business;
mod daemon;
pub mod error;
pub mod events;
pub mod metrics;
pub mod notification;
pub mod policy;
pub mod probe;
pub mod testing;
pub mod watchdog;

pub use alert::{Alert, AlertKind, Severity};
pub use approval::{
    ActionType, ApprovalAction, ApprovalRequest, ApprovalStatus, ApprovalTicket, ApprovalWorkflow,
    Decision, DecisionOutcome,
};
pub use business::{BusinessAnomalyMonitor, BusinessStats};
pub use error::{Result, SentinelError};
pub use events::{EventBus, LogSink, MonitorEvent, NotificationForwarder};
pub use metrics::{HealthStats, HealthStatus, PulseHistory, PulseSample};
pub use notification::{FanoutChannel, LogChannel, Notification, NotificationChannel};
#[cfg(feature = "http")]
pub use notification::TelegramChannel;
pub use policy::{
    AlertRepeatPolicy, ApprovalPolicy, BusinessPolicy, WatchdogPolicy, MAX_DECISION_DELAY,
};
#[cfg(feature = "http")]
pub use probe::HttpProbe;
pub use probe::PulseProbe;
pub use watchdog::{HealthView, HealthWatchdog, RequestId, WatchdogStatus};
