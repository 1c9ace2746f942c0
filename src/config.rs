/*!
 * Configuration types for Waypoint
 *
 * Loaded from a TOML file. Every section and field has a default, so an
 * empty file is a valid configuration. Durations are written in
 * milliseconds.
 *
 * ```toml
 * [logging]
 * level = "info"
 *
 * [defaults.retry]
 * max_retries = 3
 * initial_delay = 1000
 *
 * [[dependencies]]
 * name = "solvex"
 * probe_url = "https://api.solvex.example/health"
 *
 * [dependencies.rate_limit]
 * max_requests = 30
 * window = 60000
 *
 * [watchdog]
 * pulse_interval = 300000
 *
 * [notification.telegram]
 * chat_id = "-100123456"
 * ```
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use waypoint_core_resilience::{
    serde_millis, BatchConfig, CircuitBreakerConfig, QueueConfig, RateLimitConfig, RetryPolicy,
};
use waypoint_sentinel::{ApprovalPolicy, BusinessPolicy, WatchdogPolicy};

use crate::error::{Result, WaypointError};
use crate::gateway::GuardSettings;

/// Environment variable holding the Telegram bot token
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "WAYPOINT_TELEGRAM_BOT_TOKEN";
/// Environment variable holding the Telegram chat id
pub const ENV_TELEGRAM_CHAT_ID: &str = "WAYPOINT_TELEGRAM_CHAT_ID";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    pub logging: LoggingConfig,
    /// Guard settings for dependencies without their own overrides
    pub defaults: GuardSettings,
    pub dependencies: Vec<DependencyConfig>,
    pub watchdog: WatchdogPolicy,
    pub business: BusinessPolicy,
    pub approval: ApprovalPolicy,
    pub notification: NotificationConfig,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Log file path (None = stdout)
    pub file: Option<PathBuf>,

    /// Shorthand for level = debug
    pub verbose: bool,
}

/// One supplier the gateway protects
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub name: String,

    /// Health URL probed by the watchdog; no periodic pulse without it
    pub probe_url: Option<String>,

    pub rate_limit: Option<RateLimitConfig>,
    pub retry: Option<RetryPolicy>,
    pub breaker: Option<CircuitBreakerConfig>,
    pub queue: Option<QueueConfig>,
    pub batch: Option<BatchConfig>,
}

impl DependencyConfig {
    /// Defaults with this dependency's overrides applied
    pub fn guard_settings(&self, defaults: &GuardSettings) -> GuardSettings {
        GuardSettings {
            rate_limit: self.rate_limit.unwrap_or(defaults.rate_limit),
            retry: self.retry.unwrap_or(defaults.retry),
            breaker: self.breaker.unwrap_or(defaults.breaker),
            queue: self.queue.unwrap_or(defaults.queue),
            batch: self.batch.unwrap_or(defaults.batch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Also write every notification to the log
    pub log: bool,

    /// Upper bound for one delivery attempt
    #[serde(with = "serde_millis")]
    pub timeout: Duration,

    pub telegram: Option<TelegramConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log: true,
            timeout: Duration::from_secs(10),
            telegram: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Bot API host override
    pub api_base: Option<String>,
}

impl WaypointConfig {
    /// Load, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse without environment overrides or validation
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| WaypointError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Fill Telegram credentials from the environment. Environment values win
    /// over the file, and either variable alone enables the channel.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(ENV_TELEGRAM_BOT_TOKEN).filter(|v| !v.is_empty());
        let chat_id = lookup(ENV_TELEGRAM_CHAT_ID).filter(|v| !v.is_empty());
        if token.is_none() && chat_id.is_none() {
            return;
        }

        let telegram = self.notification.telegram.get_or_insert_with(Default::default);
        if let Some(token) = token {
            telegram.bot_token = token;
        }
        if let Some(chat_id) = chat_id {
            telegram.chat_id = chat_id;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let section = |name: &str, result: std::result::Result<(), String>| {
            result.map_err(|e| WaypointError::Config(format!("[{}] {}", name, e)))
        };

        section("watchdog", self.watchdog.validate())?;
        section("business", self.business.validate())?;
        section("approval", self.approval.validate())?;
        section("defaults", validate_guard(&self.defaults))?;

        let mut seen = HashSet::new();
        for dependency in &self.dependencies {
            if dependency.name.trim().is_empty() {
                return Err(WaypointError::Config(
                    "[[dependencies]] entry without a name".to_string(),
                ));
            }
            if !seen.insert(dependency.name.as_str()) {
                return Err(WaypointError::Config(format!(
                    "dependency '{}' is listed twice",
                    dependency.name
                )));
            }
            section(
                dependency.name.as_str(),
                validate_guard(&dependency.guard_settings(&self.defaults)),
            )?;
        }

        if !self.dependencies.is_empty() && !seen.contains(self.business.watched_dependency.as_str())
        {
            return Err(WaypointError::Config(format!(
                "[business] watched_dependency '{}' is not a configured dependency",
                self.business.watched_dependency
            )));
        }

        if let Some(telegram) = &self.notification.telegram {
            if telegram.bot_token.is_empty() {
                return Err(WaypointError::Config(format!(
                    "[notification.telegram] bot_token is empty (set it or {})",
                    ENV_TELEGRAM_BOT_TOKEN
                )));
            }
            if telegram.chat_id.is_empty() {
                return Err(WaypointError::Config(format!(
                    "[notification.telegram] chat_id is empty (set it or {})",
                    ENV_TELEGRAM_CHAT_ID
                )));
            }
        }
        if self.notification.timeout.is_zero() {
            return Err(WaypointError::Config(
                "[notification] timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_guard(settings: &GuardSettings) -> std::result::Result<(), String> {
    if settings.rate_limit.max_requests == 0 || settings.rate_limit.window.is_zero() {
        return Err("rate_limit needs max_requests and window above 0".to_string());
    }
    if !settings.retry.multiplier.is_finite() || settings.retry.multiplier < 1.0 {
        return Err("retry multiplier must be a finite number of at least 1.0".to_string());
    }
    if settings.retry.attempt_timeout.is_zero() {
        return Err("retry attempt_timeout must be greater than 0".to_string());
    }
    if settings.breaker.failure_threshold == 0 {
        return Err("breaker failure_threshold must be at least 1".to_string());
    }
    if settings.queue.concurrency == 0 {
        return Err("queue concurrency must be at least 1".to_string());
    }
    if settings.batch.batch_size == 0 {
        return Err("batch_size must be at least 1".to_string());
    }
    Ok(())
}
