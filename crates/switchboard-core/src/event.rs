//! Coordinator events.

use switchboard_models::{HandoffId, SessionId};

/// Events broadcast by the coordinator after state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    AgentRegistered {
        agent: String,
        session: SessionId,
    },
    AgentRemoved {
        agent: String,
    },
    TeamCreated {
        team: String,
    },
    TeamRemoved {
        team: String,
    },
    MembershipChanged {
        agent: String,
        team: String,
        joined: bool,
    },
    SessionLocked {
        session: SessionId,
        owner: String,
    },
    SessionUnlocked {
        session: SessionId,
    },
    /// An agent asked a lock owner for access.
    AccessRequested {
        session: SessionId,
        requester: String,
        owner: String,
    },
    /// A playbook finished. `failures` counts failed or timed-out deliveries.
    PlaybookFinished {
        name: String,
        failures: usize,
    },
    HandoffInitiated {
        id: HandoffId,
        source: String,
        target: String,
    },
}

impl CoordinatorEvent {
    /// Returns the agent this event is about, if any.
    pub fn agent(&self) -> Option<&str> {
        match self {
            CoordinatorEvent::AgentRegistered { agent, .. }
            | CoordinatorEvent::AgentRemoved { agent }
            | CoordinatorEvent::MembershipChanged { agent, .. } => Some(agent),
            CoordinatorEvent::SessionLocked { owner, .. } => Some(owner),
            CoordinatorEvent::AccessRequested { requester, .. } => Some(requester),
            CoordinatorEvent::HandoffInitiated { source, .. } => Some(source),
            CoordinatorEvent::TeamCreated { .. }
            | CoordinatorEvent::TeamRemoved { .. }
            | CoordinatorEvent::SessionUnlocked { .. }
            | CoordinatorEvent::PlaybookFinished { .. } => None,
        }
    }

    /// Returns true if this event changed lock state.
    pub fn is_lock_event(&self) -> bool {
        matches!(
            self,
            CoordinatorEvent::SessionLocked { .. } | CoordinatorEvent::SessionUnlocked { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_agent() {
        let event = CoordinatorEvent::AgentRegistered {
            agent: "builder".to_string(),
            session: SessionId::from("%1"),
        };
        assert_eq!(event.agent(), Some("builder"));

        let event = CoordinatorEvent::TeamCreated {
            team: "backend".to_string(),
        };
        assert_eq!(event.agent(), None);
    }

    #[test]
    fn test_is_lock_event() {
        let event = CoordinatorEvent::SessionUnlocked {
            session: SessionId::from("%1"),
        };
        assert!(event.is_lock_event());
        assert!(!CoordinatorEvent::AgentRemoved {
            agent: "a".to_string()
        }
        .is_lock_event());
    }
}
