//! Error types for the coordination core.

use switchboard_models::SessionId;
use switchboard_persistence::PersistenceError;
use switchboard_provider::ProviderError;
use thiserror::Error;

/// Errors returned by registry, lock, cascade and playbook operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown agent, team, session, handoff or barrier.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Duplicate registration.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// Write attempted against a session owned by another agent.
    #[error("session {session} is locked by {owner}")]
    LockConflict { session: SessionId, owner: String },

    /// Release attempted by an agent that does not own the lock.
    #[error("agent {agent} does not own the lock on session {session}")]
    NotOwner { session: SessionId, agent: String },

    /// Malformed input such as an empty target or an empty playbook.
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure reported by the session provider.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// An internal lock was poisoned by a panicking thread.
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl CoreError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        CoreError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
