//! Alert model shared by the watchdog and the business monitor
//!
//! Alerts are immutable once built. Detectors publish them on the
//! [`EventBus`](crate::events::EventBus); logging and notification are
//! subscribers.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ALERT_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    fn icon(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Critical => "🚨",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Searches stopped while the supplier is healthy
    UiIssue,
    NoSearches,
    NoBookings,
    LowConversion,
    HighLatency,
    TokenRefreshRequired,
    MaintenanceMode,
    /// Repeated failures with one HTTP status
    HttpStatus(u16),
}

impl AlertKind {
    /// Wire code, e.g. `UI_ISSUE` or `HTTP_503`
    pub fn code(&self) -> String {
        match self {
            AlertKind::UiIssue => "UI_ISSUE".to_string(),
            AlertKind::NoSearches => "NO_SEARCHES".to_string(),
            AlertKind::NoBookings => "NO_BOOKINGS".to_string(),
            AlertKind::LowConversion => "LOW_CONVERSION".to_string(),
            AlertKind::HighLatency => "HIGH_LATENCY".to_string(),
            AlertKind::TokenRefreshRequired => "TOKEN_REFRESH_REQUIRED".to_string(),
            AlertKind::MaintenanceMode => "MAINTENANCE_MODE".to_string(),
            AlertKind::HttpStatus(status) => format!("HTTP_{status}"),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl Serialize for AlertKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub diagnosis: String,
    pub recommendation: String,
    /// Dependency the alert concerns; `None` for business-wide alerts
    pub dependency: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: Severity, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let seq = ALERT_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!(
                "{}-{}-{}",
                kind.code().to_lowercase(),
                timestamp.timestamp_millis(),
                seq
            ),
            kind,
            severity,
            message: message.into(),
            diagnosis: String::new(),
            recommendation: String::new(),
            dependency: None,
            timestamp,
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    pub fn with_diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.diagnosis = diagnosis.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    /// Cooldown / dedup key: kind plus dependency
    pub fn key(&self) -> String {
        format!(
            "{}-{}",
            self.kind.code(),
            self.dependency.as_deref().unwrap_or("global")
        )
    }

    /// Markdown rendering for chat channels
    pub fn to_markdown(&self) -> String {
        let mut text = format!(
            "{} *{}* ({})\n\n{}",
            self.severity.icon(),
            self.kind.code(),
            self.severity,
            self.message
        );
        if let Some(dependency) = &self.dependency {
            text.push_str(&format!("\n\n*Dependency:* `{dependency}`"));
        }
        if !self.diagnosis.is_empty() {
            text.push_str(&format!("\n*Diagnosis:* {}", self.diagnosis));
        }
        if !self.recommendation.is_empty() {
            text.push_str(&format!("\n*Recommendation:* {}", self.recommendation));
        }
        text.push_str(&format!(
            "\n\n_{}_",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        text
    }
}

/// Likely cause of a failing status code, refined by the error text
pub fn diagnose_status(status: u16, error: Option<&str>) -> String {
    let mut diagnosis = match status {
        400 => "Invalid request parameters or malformed request body",
        401 => "API credentials are invalid, expired, or missing",
        403 => "API access is forbidden; check permissions or IP allowlist",
        404 => "API endpoint not found; verify the endpoint URL",
        429 => "Rate limit exceeded; too many requests in a short time",
        500 => "Internal server error; the supplier is experiencing issues",
        502 => "Bad gateway; the supplier is unreachable or down",
        503 => "Service unavailable; the supplier is temporarily down",
        504 => "Gateway timeout; the supplier is not responding",
        _ => "Unknown error occurred",
    }
    .to_string();

    if let Some(error) = error.map(str::to_lowercase) {
        if error.contains("timeout") || error.contains("timed out") {
            diagnosis.push_str(". Request timed out; the supplier is slow or unresponsive");
        } else if error.contains("network") || error.contains("connection") {
            diagnosis.push_str(". Network connectivity issue detected");
        }
    }

    diagnosis
}

/// Suggested operator action for a failing status code
pub fn recommend_for_status(status: u16) -> &'static str {
    match status {
        400 => "Review request parameters against the supplier documentation",
        401 => "Refresh the API token or verify the stored credentials",
        403 => "Contact the supplier to verify access permissions",
        404 => "Verify the API endpoint URL and version",
        429 => "Throttle requests or ask the supplier for a higher rate limit",
        500 => "Wait for the supplier to recover; contact them if it persists",
        502 => "Check the supplier status page; wait for recovery if down",
        503 => "The supplier is under maintenance; wait and retry later",
        504 => "Increase the timeout or contact the supplier",
        _ => "Monitor the situation and contact support if the issue persists",
    }
}
