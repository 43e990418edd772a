//! Error types for session providers.

use thiserror::Error;

/// Errors surfaced by a session provider.
///
/// The coordinator never interprets these beyond passing them through.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The session handle does not refer to a live session.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// The provider backend is not installed or not reachable.
    #[error("provider not available: {0}")]
    NotAvailable(String),

    /// A backend command failed.
    #[error("provider command failed: {0}")]
    CommandFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend output could not be understood.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
