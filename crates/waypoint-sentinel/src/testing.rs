//! Test doubles for channels, probes and health views
//!
//! Used by this crate's tests and by downstream crates that wire the sentinel
//! into a larger system.

use crate::error::{Result, SentinelError};
use crate::metrics::HealthStatus;
use crate::notification::{Notification, NotificationChannel};
use crate::probe::PulseProbe;
use crate::watchdog::HealthView;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Records every notification it is asked to send
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Notification>>,
    delay: Option<Duration>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before recording, to exercise delivery timeouts
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|n| n.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Fails every send
#[derive(Debug)]
pub struct FailingChannel {
    message: String,
    attempts: AtomicUsize,
}

impl FailingChannel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _notification: &Notification) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SentinelError::Notification {
            channel: "failing".to_string(),
            message: self.message.clone(),
        })
    }
}

/// One scripted probe response
#[derive(Debug, Clone)]
pub enum ProbeStep {
    Status { code: u16, latency: Duration },
    Fail { error: String, latency: Duration },
}

impl ProbeStep {
    pub fn ok(latency_ms: u64) -> Self {
        Self::status(200, latency_ms)
    }

    pub fn status(code: u16, latency_ms: u64) -> Self {
        ProbeStep::Status {
            code,
            latency: Duration::from_millis(latency_ms),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        ProbeStep::Fail {
            error: error.into(),
            latency: Duration::ZERO,
        }
    }
}

/// Replays a script of responses; the last step repeats once the script is
/// exhausted. Latency is simulated with `tokio::time::sleep`.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    steps: Mutex<VecDeque<ProbeStep>>,
    last: Mutex<Option<ProbeStep>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(steps: impl IntoIterator<Item = ProbeStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(step: ProbeStep) -> Self {
        Self::new([step])
    }

    /// Append steps to the script
    pub fn push(&self, step: ProbeStep) {
        self.steps.lock().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PulseProbe for ScriptedProbe {
    async fn probe(&self) -> Result<u16> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let next = self.steps.lock().pop_front();
            let mut last = self.last.lock();
            if let Some(step) = next {
                *last = Some(step);
            }
            last.clone()
        };

        match step {
            None => Ok(200),
            Some(ProbeStep::Status { code, latency }) => {
                tokio::time::sleep(latency).await;
                Ok(code)
            }
            Some(ProbeStep::Fail { error, latency }) => {
                tokio::time::sleep(latency).await;
                Err(SentinelError::Probe(error))
            }
        }
    }
}

/// Fixed health answers; unknown dependencies are `down`
#[derive(Debug, Default)]
pub struct StaticHealth {
    statuses: Mutex<HashMap<String, HealthStatus>>,
}

impl StaticHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, dependency: impl Into<String>, status: HealthStatus) -> Self {
        self.set(dependency, status);
        self
    }

    pub fn set(&self, dependency: impl Into<String>, status: HealthStatus) {
        self.statuses.lock().insert(dependency.into(), status);
    }
}

impl HealthView for StaticHealth {
    fn health_status(&self, dependency: &str) -> HealthStatus {
        self.statuses
            .lock()
            .get(dependency)
            .copied()
            .unwrap_or(HealthStatus::Down)
    }
}
