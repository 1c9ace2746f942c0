//! Waypoint Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks that wrap every outbound call to an
//! unreliable travel supplier. It includes:
//!
//! - **Rate Limiter**: Fixed-window admission gate per dependency
//! - **Request Queue**: Bounded-concurrency FIFO dispatch
//! - **Batch Loader**: Coalesces keyed lookups into one batched call
//! - **Circuit Breaker**: Fails fast once a dependency is unhealthy
//! - **Retrying Executor**: Per-attempt timeout, bounded retry, exponential backoff
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Supplier payloads or protocols
//! - Alerting, dashboards, or human approval
//! - Application-specific concerns
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Caller / provider adapter       │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Admit or reject
//! │  (Fixed window per dependency)          │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Request Queue / Batch Loader      │  ← Bound concurrency
//! │  (FIFO, at most C in flight)            │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Counts post-retry failures)           │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retrying Executor                 │  ← Absorb transient failures
//! │  (Timeout, D, 2D, 4D, ... backoff)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         Travel supplier API
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use waypoint_core_resilience::prelude::*;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let breaker = CircuitBreaker::new("solvex", CircuitBreakerConfig::default());
//! let executor = RetryingExecutor::new(RetryPolicy::default());
//!
//! let result = breaker
//!     .call(|| executor.execute(|| async { Ok::<_, ResilienceError>(42) }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod batch_loader;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod request_queue;
pub mod retry;
pub mod serde_millis;

// Re-export main types for convenience
pub use batch_loader::{BatchConfig, BatchLoader};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use error::ResilienceError;
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use request_queue::{QueueConfig, QueueStats, RequestQueue};
pub use retry::{RetryObserver, RetryPolicy, RetryingExecutor};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use waypoint_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::batch_loader::{BatchConfig, BatchLoader};
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::{RateLimitConfig, RateLimiter};
    pub use super::request_queue::{QueueConfig, RequestQueue};
    pub use super::retry::{RetryPolicy, RetryingExecutor};
}
