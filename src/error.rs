/*!
 * Error types for Waypoint
 */

use std::io;
use thiserror::Error;
use waypoint_core_resilience::ResilienceError;
use waypoint_sentinel::SentinelError;

pub type Result<T> = std::result::Result<T, WaypointError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;

#[derive(Debug, Error)]
pub enum WaypointError {
    /// Configuration is missing a value or contradicts itself
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Config file is not valid TOML for the expected shape
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error(transparent)]
    Sentinel(#[from] SentinelError),
}

impl WaypointError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            WaypointError::Config(_) | WaypointError::Toml(_) => EXIT_CONFIG,
            _ => EXIT_FATAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            WaypointError::Config("missing chat id".into()).exit_code(),
            EXIT_CONFIG
        );
        assert_eq!(
            WaypointError::Logging("already set".into()).exit_code(),
            EXIT_FATAL
        );
    }

    #[test]
    fn test_resilience_error_is_transparent() {
        let err: WaypointError = ResilienceError::CircuitOpen {
            dependency: "solvex".into(),
        }
        .into();
        assert_eq!(err.to_string(), "circuit open for solvex");
    }
}
