//! Error types for session lifecycle operations.

use std::time::Duration;

/// Error type for session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session identifier is not a 32-character lowercase hex token.
    #[error("Invalid session id")]
    InvalidSessionId,

    /// Serialized session values exceed the configured maximum.
    #[error("Session data too large: {size} bytes exceeds limit of {limit} bytes")]
    SessionTooLarge { size: usize, limit: usize },

    /// The secure randomness source could not produce entropy.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    /// Error reported by the persistence backend.
    #[error("Store error: {0}")]
    Store(String),

    /// A backend call did not finish within the configured timeout.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The manager or store has already been closed.
    #[error("Session store is closed")]
    Closed,

    /// Session values could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A cookie could not be rendered as a header value.
    #[error("Invalid header value: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),

    /// Manager configuration was rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wrap any backend error as a [`Error::Store`].
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type for session lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
