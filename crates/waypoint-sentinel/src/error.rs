//! Error types for the sentinel crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SentinelError>;

#[derive(Debug, Error)]
pub enum SentinelError {
    /// A notification channel refused or failed to deliver a message
    #[error("notification channel '{channel}' failed: {message}")]
    Notification { channel: String, message: String },

    /// A pulse probe could not reach its dependency
    #[error("probe failed: {0}")]
    Probe(String),

    /// A decision callback payload could not be parsed
    #[error("invalid decision callback: {0}")]
    InvalidCallback(String),

    /// A policy failed validation
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// HTTP transport error
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
