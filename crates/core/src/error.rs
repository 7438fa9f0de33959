//! Error types for ttseries
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Watch conflicts are deliberately absent: the store reports them as an
//! [`ExecOutcome::Conflict`](crate::types::ExecOutcome) value and the retry
//! loop consumes them, so they never reach a caller.

use thiserror::Error;

/// Result type alias for ttseries operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for time-series operations
#[derive(Debug, Error)]
pub enum Error {
    /// Series name collides with the reserved companion-key namespace
    #[error("Invalid key '{key}': series names may not contain '{reserved}'")]
    InvalidKey {
        /// Offending series name
        key: String,
        /// Reserved marker found in the name
        reserved: &'static str,
    },

    /// Insert attempted at a timestamp that is already present
    #[error("Duplicate timestamp(s) in series '{key}': {timestamps:?}")]
    DuplicateTimestamp {
        /// Series name
        key: String,
        /// Colliding timestamps
        timestamps: Vec<f64>,
    },

    /// Encoded payload is already stored at another timestamp
    #[error("Repeated value in series '{key}' at timestamp {timestamp}")]
    RepeatedValue {
        /// Series name
        key: String,
        /// Timestamp of the rejected insert
        timestamp: f64,
    },

    /// Timestamp cannot be used as a score (NaN)
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    /// Configured serializer does not satisfy the serializer contract
    #[error("Serializer configuration error: {0}")]
    SerializerConfig(String),

    /// Batch input is neither pairs nor a recognized record shape
    #[error("Unsupported payload shape: {0}")]
    UnsupportedPayloadShape(String),

    /// Transport-level failure talking to the backing store (fatal)
    #[error("Store connection error: {0}")]
    StoreConnection(String),

    /// Operation against a key holding the wrong kind of value
    #[error("WRONGTYPE operation against key '{key}' holding {actual}")]
    WrongType {
        /// Key name
        key: String,
        /// Kind of value actually stored
        actual: &'static str,
    },

    /// Optimistic retry budget exhausted
    #[error("Contention exceeded on keys {keys:?} after {attempts} attempts")]
    ContentionExceeded {
        /// Watched keys
        keys: Vec<String>,
        /// Attempts made before giving up
        attempts: usize,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Build a duplicate-timestamp error for a single timestamp
    pub fn duplicate(key: &str, timestamp: f64) -> Self {
        Error::DuplicateTimestamp {
            key: key.to_string(),
            timestamps: vec![timestamp],
        }
    }

    /// Whether retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ContentionExceeded { .. })
    }

    /// Whether the error reflects a broken connection to the store
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StoreConnection(_))
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
