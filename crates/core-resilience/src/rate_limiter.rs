//! Rate limiting for preventing supplier overload
//!
//! Fixed-window counter per dependency. A call is admitted while fewer than
//! `max_requests` calls have been admitted since the window opened; once the
//! window elapses the next call opens a new window with a count of one.
//!
//! The limiter never blocks. A refusal carries the instant the current window
//! closes so the caller can decide whether to wait or give up.

use super::error::ResilienceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Limit applied to one dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum calls admitted per window
    pub max_requests: u32,
    /// Window length
    #[serde(with = "crate::serde_millis")]
    pub window: Duration,
}

impl RateLimitConfig {
    /// `max_requests` per `window`
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Limit expressed in requests per minute
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    /// Limit expressed in requests per second
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(requests_per_second, Duration::from_secs(1))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Counter for the currently open window
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// Usage snapshot for one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    /// Calls admitted in the current window (0 when the window has expired)
    pub current: u32,
    /// Configured maximum
    pub max: u32,
    /// Configured window length
    pub window: Duration,
}

#[derive(Debug, Default)]
struct LimiterState {
    limits: HashMap<String, RateLimitConfig>,
    windows: HashMap<String, RateWindow>,
}

/// Admission gate bounding requests per unit time per dependency.
///
/// Unregistered dependencies use the default limit given at construction.
///
/// # Example
/// ```
/// use waypoint_core_resilience::{RateLimiter, RateLimitConfig};
///
/// let limiter = RateLimiter::new(RateLimitConfig::per_minute(2));
/// assert!(limiter.check("solvex").is_ok());
/// assert!(limiter.check("solvex").is_ok());
/// assert!(limiter.check("solvex").is_err());
/// // Other dependencies have their own window
/// assert!(limiter.check("opengreece").is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    default_limit: RateLimitConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    /// Create a limiter applying `default_limit` to every dependency
    pub fn new(default_limit: RateLimitConfig) -> Self {
        Self {
            default_limit,
            state: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    /// Register a dedicated limit for one dependency
    pub fn register_limit(&self, dependency: impl Into<String>, limit: RateLimitConfig) {
        let dependency = dependency.into();
        debug!(
            dependency = %dependency,
            max_requests = limit.max_requests,
            window_ms = limit.window.as_millis() as u64,
            "Registered rate limit"
        );
        self.state.lock().limits.insert(dependency, limit);
    }

    /// Try to admit one call for `dependency`.
    pub fn check(&self, dependency: &str) -> Result<(), ResilienceError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let limit = state
            .limits
            .get(dependency)
            .copied()
            .unwrap_or(self.default_limit);

        let window = state
            .windows
            .entry(dependency.to_string())
            .or_insert(RateWindow {
                count: 0,
                window_start: now,
            });

        if now.duration_since(window.window_start) >= limit.window {
            window.window_start = now;
            window.count = 0;
        }

        if window.count >= limit.max_requests {
            let reset_at = window.window_start + limit.window;
            let retry_after = reset_at.saturating_duration_since(now);
            warn!(
                dependency = %dependency,
                count = window.count,
                max = limit.max_requests,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(ResilienceError::RateLimitExceeded {
                dependency: dependency.to_string(),
                reset_at,
                retry_after,
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Convenience wrapper returning a boolean
    pub fn allow(&self, dependency: &str) -> bool {
        self.check(dependency).is_ok()
    }

    /// Current usage for `dependency`
    pub fn stats(&self, dependency: &str) -> RateLimitStats {
        let now = Instant::now();
        let state = self.state.lock();
        let limit = state
            .limits
            .get(dependency)
            .copied()
            .unwrap_or(self.default_limit);
        let current = state
            .windows
            .get(dependency)
            .filter(|w| now.duration_since(w.window_start) < limit.window)
            .map(|w| w.count)
            .unwrap_or(0);

        RateLimitStats {
            current,
            max: limit.max_requests,
            window: limit.window,
        }
    }

    /// Drop the window for one dependency (operator override)
    pub fn reset(&self, dependency: &str) {
        self.state.lock().windows.remove(dependency);
        debug!(dependency = %dependency, "Rate limit window reset");
    }

    /// Drop every window
    pub fn reset_all(&self) {
        self.state.lock().windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sixty_first_call_rejected_then_window_rolls() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, Duration::from_millis(60_000)));

        for _ in 0..60 {
            assert!(limiter.check("solvex").is_ok());
        }

        match limiter.check("solvex") {
            Err(ResilienceError::RateLimitExceeded { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }

        tokio::time::advance(Duration::from_millis(60_000)).await;

        assert!(limiter.check("solvex").is_ok());
        assert_eq!(limiter.stats("solvex").current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_at_reflects_window_start() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(10)));
        let start = Instant::now();
        limiter.check("tct").unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        match limiter.check("tct") {
            Err(ResilienceError::RateLimitExceeded {
                reset_at,
                retry_after,
                ..
            }) => {
                assert_eq!(reset_at, start + Duration::from_secs(10));
                assert_eq!(retry_after, Duration::from_secs(6));
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_registered_limit_overrides_default() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(100));
        limiter.register_limit("opengreece", RateLimitConfig::per_minute(1));

        assert!(limiter.allow("opengreece"));
        assert!(!limiter.allow("opengreece"));
        assert!(limiter.allow("solvex"));

        let stats = limiter.stats("opengreece");
        assert_eq!(stats.current, 1);
        assert_eq!(stats.max, 1);
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(1));
        assert!(limiter.allow("solvex"));
        assert!(!limiter.allow("solvex"));

        limiter.reset("solvex");
        assert!(limiter.allow("solvex"));
        assert_eq!(limiter.stats("unknown").current, 0);
    }
}
