//! Error types for the personalization gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Personalization attempt failure
    #[error("Personalization error: {0}")]
    Personalization(#[from] PersonalizationError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classified failure of a personalization attempt.
///
/// The variant tag is what the fallback classifier switches on; free-text
/// failures coming over an untyped boundary are bucketed once, at the edge,
/// by [`PersonalizationError::from_message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersonalizationError {
    /// The attempt exceeded its timeout budget
    #[error("personalization timed out")]
    Timeout,

    /// The content provider could not be reached
    #[error("network failure reaching content provider")]
    Network,

    /// The provider returned malformed or invalid content
    #[error("invalid personalization data")]
    Data,

    /// Anything that did not match a known failure class
    #[error("personalization failed: {0}")]
    Unknown(String),
}

impl PersonalizationError {
    /// Bucket an arbitrary failure message into a failure class.
    ///
    /// Callers at the provider boundary may hand us any failure value coerced
    /// to a string; matching happens here exactly once so downstream code only
    /// ever sees the variant tag.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("network")
            || lower.contains("fetch")
            || lower.contains("connection")
        {
            Self::Network
        } else if lower.contains("parse")
            || lower.contains("invalid")
            || lower.contains("malformed")
            || lower.contains("unexpected token")
        {
            Self::Data
        } else {
            Self::Unknown(message.to_string())
        }
    }
}
