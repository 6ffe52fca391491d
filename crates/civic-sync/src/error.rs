//! Sync service error types.

use thiserror::Error;

use civic_persistence::EngineError;

/// Errors surfaced by the sync service and the verification queue.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("verification queue full")]
    QueueFull,

    #[error("verification queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
