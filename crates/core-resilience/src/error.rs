//! Error taxonomy shared by every resilience primitive
//!
//! Errors are classified along two axes: whether a retry can help
//! (`is_transient`) and whether the failure says something about the health of
//! the dependency (`should_trip_breaker`). A client mistake (4xx, validation)
//! is neither.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors produced by, or flowing through, the resilience layer.
///
/// The type is `Clone` so a single batch failure can be handed to every
/// caller that was waiting on that batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    /// Connection refused/reset, DNS failure and similar network trouble
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Supplier answered with a 5xx status
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Supplier answered with a 4xx status
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// Request was rejected locally before reaching the supplier
    #[error("validation error: {0}")]
    Validation(String),

    /// A single attempt exceeded its deadline and was cancelled
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker for this dependency is open
    #[error("circuit open for {dependency}")]
    CircuitOpen { dependency: String },

    /// Admission was refused by the rate limiter
    #[error("rate limit exceeded for {dependency}; retry after {retry_after:?}")]
    RateLimitExceeded {
        dependency: String,
        reset_at: Instant,
        retry_after: Duration,
    },

    /// The dependency is in maintenance mode and calls are short-circuited
    #[error("{dependency} is in maintenance mode")]
    Maintenance { dependency: String },

    /// The request queue backlog is full
    #[error("request queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// A batch function returned a different number of results than keys
    #[error("batch returned {actual} results for {expected} keys")]
    BatchMismatch { expected: usize, actual: usize },

    /// The operation was dropped before it produced a result
    #[error("operation cancelled")]
    Cancelled,
}

impl ResilienceError {
    /// Classify an HTTP status code returned by a supplier.
    ///
    /// 429 is treated as transient: the supplier is shedding load and a
    /// delayed retry is the documented remedy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => ResilienceError::TransientNetwork(format!("429 Too Many Requests: {message}")),
            500..=599 => ResilienceError::Server { status, message },
            _ => ResilienceError::Client { status, message },
        }
    }

    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::TransientNetwork(_)
                | ResilienceError::Server { .. }
                | ResilienceError::Timeout(_)
        )
    }

    /// Whether the error is the caller's fault and will never succeed on retry
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Client { .. } | ResilienceError::Validation(_)
        )
    }

    /// Whether the failure should count against the dependency's breaker.
    ///
    /// Local admission refusals (rate limit, maintenance, open circuit, full
    /// queue) say nothing new about the dependency and never count.
    pub fn should_trip_breaker(&self) -> bool {
        self.is_transient() || matches!(self, ResilienceError::BatchMismatch { .. })
    }

    /// HTTP status carried by the error, `0` when there is none.
    pub fn status_code(&self) -> u16 {
        match self {
            ResilienceError::Server { status, .. } | ResilienceError::Client { status, .. } => {
                *status
            }
            ResilienceError::TransientNetwork(msg) if msg.starts_with("429") => 429,
            ResilienceError::Timeout(_) => 504,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ResilienceError::from_status(503, "unavailable"),
            ResilienceError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ResilienceError::from_status(404, "missing"),
            ResilienceError::Client { status: 404, .. }
        ));
        assert!(ResilienceError::from_status(429, "slow down").is_transient());
        assert_eq!(ResilienceError::from_status(429, "slow down").status_code(), 429);
    }

    #[test]
    fn test_transient_vs_permanent() {
        assert!(ResilienceError::TransientNetwork("reset".into()).is_transient());
        assert!(ResilienceError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(ResilienceError::Validation("bad date".into()).is_permanent());
        assert!(!ResilienceError::Validation("bad date".into()).is_transient());

        let open = ResilienceError::CircuitOpen {
            dependency: "solvex".into(),
        };
        assert!(!open.is_transient());
        assert!(!open.is_permanent());
        assert!(!open.should_trip_breaker());
    }
}
