//! Session lock records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RequestId, SessionId};

/// Exclusive ownership of a session by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub session_id: SessionId,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(session_id: SessionId, owner: impl Into<String>) -> Self {
        Self {
            session_id,
            owner: owner.into(),
            acquired_at: Utc::now(),
        }
    }
}

/// A request from one agent asking a lock owner to grant access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub session_id: SessionId,
    pub requester: String,
    pub owner: String,
    pub requested_at: DateTime<Utc>,
}

impl AccessRequest {
    pub fn new(
        session_id: SessionId,
        requester: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            session_id,
            requester: requester.into(),
            owner: owner.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Persisted lock table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTable {
    #[serde(default)]
    pub locks: Vec<LockRecord>,
    #[serde(default)]
    pub requests: Vec<AccessRequest>,
}
