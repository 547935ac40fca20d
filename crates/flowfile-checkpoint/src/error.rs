//! Error types for snapshot storage operations

use thiserror::Error;

/// Result type for snapshot storage operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while storing or retrieving history snapshots
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No snapshot exists at the requested position
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// The undo stack (or redo stack) is empty
    #[error("stack is empty: {0}")]
    EmptyStack(String),

    /// Document serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// zstd (de)compression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Backend storage error (from a non-in-memory `SnapshotStore` implementation)
    #[error("storage error: {0}")]
    Storage(String),
}
