//! Error types for persistence operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or saving state.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize: {0}")]
    SerializeError(#[from] serde_json::Error),

    #[error("failed to create directory {path}: {source}")]
    DirectoryError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock {path}: {source}")]
    LockError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record on disk could not be decoded.
    #[error("corrupt record in {path} at line {line}: {message}")]
    CorruptRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
