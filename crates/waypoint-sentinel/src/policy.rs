//! Sentinel Policy Engine
//!
//! Thresholds and intervals for the watchdog, the business monitor and the
//! approval workflow. Every duration is configured in milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use waypoint_core_resilience::serde_millis;

/// Longest deadline or postpone step an approval accepts
pub const MAX_DECISION_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Health watchdog policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogPolicy {
    /// Time between pulse probes
    ///
    /// **Default:** 5 minutes
    #[serde(with = "serde_millis")]
    pub pulse_interval: Duration,

    /// Hard timeout for a single probe
    ///
    /// **Default:** 10 seconds
    #[serde(with = "serde_millis")]
    pub probe_timeout: Duration,

    /// Latency above which a successful pulse is classified `degraded`
    ///
    /// **Default:** 2 seconds
    #[serde(with = "serde_millis")]
    pub latency_threshold: Duration,

    /// Latency above which a `HIGH_LATENCY` alert is raised
    ///
    /// **Default:** 5 seconds
    #[serde(with = "serde_millis")]
    pub critical_latency: Duration,

    /// Failures of one status code before an alert (and, for 5xx,
    /// a maintenance request)
    ///
    /// **Default:** 5
    pub error_threshold: u32,

    /// 401 responses before a token refresh is requested
    ///
    /// **Default:** 3
    pub unauthorized_threshold: u32,

    /// How long automatic maintenance mode lasts before it is lifted
    ///
    /// **Default:** 15 minutes
    #[serde(with = "serde_millis")]
    pub maintenance_timeout: Duration,

    /// Minimum gap between two alerts of the same kind for one dependency
    ///
    /// **Default:** 5 minutes
    #[serde(with = "serde_millis")]
    pub alert_cooldown: Duration,

    /// Deadline given to a human before maintenance is enabled anyway
    ///
    /// **Default:** 5 minutes
    #[serde(with = "serde_millis")]
    pub approval_timeout: Duration,

    /// Samples retained per dependency
    ///
    /// **Default:** 100
    pub history_len: usize,

    /// Most recent samples used for health stats
    ///
    /// **Default:** 20
    pub stats_window: usize,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            pulse_interval: Duration::from_secs(5 * 60),
            probe_timeout: Duration::from_secs(10),
            latency_threshold: Duration::from_millis(2000),
            critical_latency: Duration::from_millis(5000),
            error_threshold: 5,
            unauthorized_threshold: 3,
            maintenance_timeout: Duration::from_secs(15 * 60),
            alert_cooldown: Duration::from_secs(5 * 60),
            approval_timeout: Duration::from_secs(5 * 60),
            history_len: 100,
            stats_window: 20,
        }
    }
}

impl WatchdogPolicy {
    /// Validate the policy configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.pulse_interval.is_zero() {
            return Err("pulse_interval must be greater than 0".to_string());
        }
        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }
        if self.critical_latency < self.latency_threshold {
            return Err("critical_latency must not be below latency_threshold".to_string());
        }
        if self.error_threshold == 0 || self.unauthorized_threshold == 0 {
            return Err("error thresholds must be at least 1".to_string());
        }
        if self.history_len == 0 {
            return Err("history_len must be at least 1".to_string());
        }
        if self.stats_window == 0 || self.stats_window > self.history_len {
            return Err("stats_window must be between 1 and history_len".to_string());
        }
        Ok(())
    }
}

/// Whether a persisting business anomaly is reported on every check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRepeatPolicy {
    /// Re-raise the alert on every check while the condition holds
    #[default]
    EveryCycle,
    /// Raise once, then stay quiet until a new domain event resets the clock
    OncePerEpisode,
}

/// Business anomaly monitor policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessPolicy {
    /// **Default:** 30 minutes
    #[serde(with = "serde_millis")]
    pub check_interval: Duration,

    /// **Default:** 2 hours
    #[serde(with = "serde_millis")]
    pub no_search_after: Duration,

    /// **Default:** 4 hours
    #[serde(with = "serde_millis")]
    pub no_booking_after: Duration,

    /// Conversion rate floor, in percent
    ///
    /// **Default:** 1.0
    pub conversion_floor_pct: f64,

    /// Searches required before conversion is judged
    ///
    /// **Default:** 50
    pub min_searches_for_conversion: u64,

    /// Dependency whose health decides between a UI issue and a supplier issue
    ///
    /// **Default:** `"supplier"`
    pub watched_dependency: String,

    pub repeat: AlertRepeatPolicy,
}

impl Default for BusinessPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30 * 60),
            no_search_after: Duration::from_secs(2 * 60 * 60),
            no_booking_after: Duration::from_secs(4 * 60 * 60),
            conversion_floor_pct: 1.0,
            min_searches_for_conversion: 50,
            watched_dependency: "supplier".to_string(),
            repeat: AlertRepeatPolicy::EveryCycle,
        }
    }
}

impl BusinessPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.check_interval.is_zero() {
            return Err("check_interval must be greater than 0".to_string());
        }
        if self.no_search_after.is_zero() || self.no_booking_after.is_zero() {
            return Err("inactivity thresholds must be greater than 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.conversion_floor_pct) {
            return Err("conversion_floor_pct must be between 0 and 100".to_string());
        }
        if self.watched_dependency.trim().is_empty() {
            return Err("watched_dependency must not be empty".to_string());
        }
        Ok(())
    }
}

/// Human approval policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalPolicy {
    /// Deadline used when a request does not name one
    ///
    /// **Default:** 5 minutes
    #[serde(with = "serde_millis")]
    pub auto_execute_after: Duration,

    /// Extension granted by each postpone decision
    ///
    /// **Default:** 5 minutes
    #[serde(with = "serde_millis")]
    pub postpone_increment: Duration,

    /// Bound on a single notification delivery
    ///
    /// **Default:** 10 seconds
    #[serde(with = "serde_millis")]
    pub notification_timeout: Duration,

    /// Resolved actions kept for inspection
    ///
    /// **Default:** 50
    pub history_len: usize,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_execute_after: Duration::from_secs(5 * 60),
            postpone_increment: Duration::from_secs(5 * 60),
            notification_timeout: Duration::from_secs(10),
            history_len: 50,
        }
    }
}

impl ApprovalPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.postpone_increment.is_zero() {
            return Err("postpone_increment must be greater than 0".to_string());
        }
        if self.auto_execute_after > MAX_DECISION_DELAY
            || self.postpone_increment > MAX_DECISION_DELAY
        {
            return Err("auto_execute_after and postpone_increment must not exceed 30 days".to_string());
        }
        if self.notification_timeout.is_zero() {
            return Err("notification_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies_are_valid() {
        let watchdog = WatchdogPolicy::default();
        assert_eq!(watchdog.pulse_interval, Duration::from_secs(300));
        assert_eq!(watchdog.error_threshold, 5);
        assert_eq!(watchdog.history_len, 100);
        assert!(watchdog.validate().is_ok());

        let business = BusinessPolicy::default();
        assert_eq!(business.no_search_after, Duration::from_secs(7200));
        assert_eq!(business.repeat, AlertRepeatPolicy::EveryCycle);
        assert!(business.validate().is_ok());

        assert!(ApprovalPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut watchdog = WatchdogPolicy::default();

        watchdog.stats_window = 200;
        assert!(watchdog.validate().is_err());
        watchdog.stats_window = 20; // Reset

        watchdog.critical_latency = Duration::from_millis(100);
        assert!(watchdog.validate().is_err());
        watchdog.critical_latency = Duration::from_secs(5); // Reset

        watchdog.error_threshold = 0;
        assert!(watchdog.validate().is_err());

        let business = BusinessPolicy {
            conversion_floor_pct: 120.0,
            ..Default::default()
        };
        assert!(business.validate().is_err());

        let approval = ApprovalPolicy {
            postpone_increment: Duration::ZERO,
            ..Default::default()
        };
        assert!(approval.validate().is_err());

        let approval = ApprovalPolicy {
            auto_execute_after: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        assert!(approval.validate().is_err());
    }

    #[test]
    fn test_deserializes_millis() {
        let policy: BusinessPolicy = serde_json::from_str(
            r#"{"no_search_after": 60000, "repeat": "once_per_episode"}"#,
        )
        .unwrap();

        assert_eq!(policy.no_search_after, Duration::from_secs(60));
        assert_eq!(policy.repeat, AlertRepeatPolicy::OncePerEpisode);
        assert_eq!(policy.check_interval, Duration::from_secs(30 * 60));
    }
}
