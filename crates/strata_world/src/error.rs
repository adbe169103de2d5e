//! Error kinds for the persistence and streaming subsystems.
//!
//! Synchronous APIs propagate these to the caller; asynchronous paths log
//! them and degrade (a failed region read becomes an empty region, a failed
//! chunk decode is skipped). The core never aborts the process.

use thiserror::Error;

/// Errors raised by the persistence subsystem.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Storage-backend failure: permissions, disk full, missing path on read.
    #[error("storage backend failure: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed region file: bad magic, unknown version or compression
    /// type, truncated payload, decompression failure.
    #[error("malformed region data: {0}")]
    Format(String),
    /// Chunk-level decode failure within an otherwise readable region.
    #[error("chunk payload decode failure: {0}")]
    Codec(String),
    /// Malformed world or zone metadata file.
    #[error("metadata decode failure: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Constructs a [`PersistenceError::Format`] from any displayable cause.
    pub fn format(msg: impl std::fmt::Display) -> Self {
        Self::Format(msg.to_string())
    }

    /// Constructs a [`PersistenceError::Codec`] from any displayable cause.
    pub fn codec(msg: impl std::fmt::Display) -> Self {
        Self::Codec(msg.to_string())
    }
}

/// Result alias for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
