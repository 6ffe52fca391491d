//! Persistence layer error types and the transient/permanent taxonomy.

use thiserror::Error;

/// Engine errors surfaced by the cache, store, and manager layers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Redis error: {0}")]
    Cache(String),

    #[error("MongoDB error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Entity not found: {collection} with key {key}")]
    NotFound { collection: String, key: String },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Queue full")]
    QueueFull,

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Message fragments that mark an I/O failure as retryable.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "unavailable",
    "reset",
    "broken pipe",
    "session",
    "500",
    "502",
    "503",
    "504",
];

fn message_is_transient(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p))
}

impl EngineError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Decode errors, missing entities, and capacity signals are
    /// permanent; store/cache I/O failures are classified by message.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Cache(msg) | Self::Store(msg) => message_is_transient(msg),
            Self::Timeout { .. } => true,
            Self::Serialization(_)
            | Self::NotFound { .. }
            | Self::UnknownCollection(_)
            | Self::QueueFull => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

#[cfg(feature = "mongo")]
impl From<mongodb::error::Error> for EngineError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
