//! Error types for the memory crate.

use swarm_types::ErrorKind;
use thiserror::Error;

/// Errors raised by history and blob stores.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Filesystem operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested message or blob not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data or identifier.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl MemoryError {
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::NotFound(_) => ErrorKind::NotFound,
            MemoryError::InvalidData(_) => ErrorKind::BadRequest,
            MemoryError::Io { .. } | MemoryError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
