/*!
 * Waypoint - resilience and autonomous monitoring for travel-supplier calls
 *
 * Every outbound supplier call goes through a [`SupplierGateway`]:
 * - Maintenance short-circuit driven by the health watchdog
 * - Fixed-window rate limiting per supplier
 * - Bounded-concurrency request queue, optional batching
 * - Circuit breaker around a retrying executor with exponential backoff
 *
 * The sentinel crate watches the same suppliers, raises alerts, and asks a
 * human before switching a failing supplier into maintenance mode.
 */

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod report;
pub mod services;

// Re-export commonly used types
pub use config::{DependencyConfig, LogLevel, LoggingConfig, NotificationConfig, WaypointConfig};
pub use error::{Result, WaypointError};
pub use gateway::{BusinessEvent, DependencyGuard, GuardSettings, Operation, SupplierGateway};
pub use services::Services;

pub use waypoint_core_resilience as resilience;
pub use waypoint_sentinel as sentinel;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
