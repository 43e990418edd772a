//! Agent handoff records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::HandoffId;

/// A transfer of work context from one agent to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: HandoffId,

    /// Agent handing off.
    pub source: String,

    /// Agent receiving the work.
    pub target: String,

    /// Free-form context describing the work being handed over.
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub reason: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub acknowledged: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Handoff {
    /// Creates a new unacknowledged handoff.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        context: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: HandoffId::new(),
            source: source.into(),
            target: target.into(),
            context: context.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
            acknowledged: false,
            acknowledged_at: None,
        }
    }

    /// Marks the handoff acknowledged.
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
        self.acknowledged_at = Some(Utc::now());
    }

    /// Returns true if `agent` is the source or target.
    pub fn involves(&self, agent: &str) -> bool {
        self.source == agent || self.target == agent
    }

    /// Formats the notice typed into the target's session.
    pub fn notice(&self) -> String {
        let mut text = format!("[HANDOFF from {}]", self.source);
        if !self.reason.is_empty() {
            text.push_str(&format!(" Reason: {}.", self.reason));
        }
        if !self.context.is_empty() {
            text.push_str(&format!(" Context: {}", self.context));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledge() {
        let mut handoff = Handoff::new("a", "b", "ctx", "done");
        assert!(!handoff.acknowledged);
        handoff.acknowledge();
        assert!(handoff.acknowledged);
        assert!(handoff.acknowledged_at.is_some());
    }

    #[test]
    fn test_involves() {
        let handoff = Handoff::new("a", "b", "", "");
        assert!(handoff.involves("a"));
        assert!(handoff.involves("b"));
        assert!(!handoff.involves("c"));
    }

    #[test]
    fn test_notice() {
        let handoff = Handoff::new("lead", "dev", "fix the login bug", "shift change");
        assert_eq!(
            handoff.notice(),
            "[HANDOFF from lead] Reason: shift change. Context: fix the login bug"
        );
        assert_eq!(Handoff::new("lead", "dev", "", "").notice(), "[HANDOFF from lead]");
    }
}
