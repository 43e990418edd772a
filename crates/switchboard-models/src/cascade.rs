//! Cascading message types.
//!
//! A [`CascadingMessage`] is one routing instruction: an optional broadcast,
//! per-team messages and per-agent messages. Resolving it against the
//! registry produces a [`CascadePlan`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A routing instruction with agent > team > broadcast priority.
///
/// Maps are ordered so that team tie-breaks are lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadingMessage {
    /// Content for every agent not covered by a more specific entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<String>,

    /// Content per team name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub team_messages: BTreeMap<String, String>,

    /// Content per agent name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_messages: BTreeMap<String, String>,
}

impl CascadingMessage {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broadcast content.
    pub fn with_broadcast(mut self, content: impl Into<String>) -> Self {
        self.broadcast = Some(content.into());
        self
    }

    /// Adds a team message.
    pub fn with_team(mut self, team: impl Into<String>, content: impl Into<String>) -> Self {
        self.team_messages.insert(team.into(), content.into());
        self
    }

    /// Adds an agent message.
    pub fn with_agent(mut self, agent: impl Into<String>, content: impl Into<String>) -> Self {
        self.agent_messages.insert(agent.into(), content.into());
        self
    }

    /// Returns true if nothing would be delivered.
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_none() && self.team_messages.is_empty() && self.agent_messages.is_empty()
    }
}

/// Which routing rule produced a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "source", rename_all = "snake_case")]
pub enum CascadeRule {
    /// The agent was addressed directly.
    AgentDirect,
    /// The agent was addressed through this team.
    TeamMessage(String),
    /// The agent fell through to the broadcast.
    Broadcast,
}

impl fmt::Display for CascadeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeRule::AgentDirect => write!(f, "agent"),
            CascadeRule::TeamMessage(team) => write!(f, "team:{}", team),
            CascadeRule::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// One agent's resolved message and the rule that picked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub agent: String,
    pub content: String,
    #[serde(flatten)]
    pub rule: CascadeRule,
}

/// A resolved delivery plan: content to the ordered list of recipients.
///
/// Recipients appear once per content. An agent may appear under several
/// contents when plans are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CascadePlan {
    pub deliveries: BTreeMap<String, Vec<String>>,
}

impl CascadePlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `agent` as a recipient of `content`. Returns false if it was
    /// already present.
    pub fn add(&mut self, content: &str, agent: &str) -> bool {
        let recipients = self.deliveries.entry(content.to_string()).or_default();
        if recipients.iter().any(|a| a == agent) {
            return false;
        }
        recipients.push(agent.to_string());
        true
    }

    /// Unions another plan into this one.
    pub fn merge(&mut self, other: &CascadePlan) {
        for (content, agents) in &other.deliveries {
            for agent in agents {
                self.add(content, agent);
            }
        }
    }

    /// Recipients of `content`.
    pub fn recipients(&self, content: &str) -> &[String] {
        self.deliveries
            .get(content)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every content addressed to `agent`.
    pub fn contents_for(&self, agent: &str) -> Vec<&str> {
        self.deliveries
            .iter()
            .filter(|(_, agents)| agents.iter().any(|a| a == agent))
            .map(|(content, _)| content.as_str())
            .collect()
    }

    /// Total number of (content, agent) pairs.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

impl FromIterator<Delivery> for CascadePlan {
    fn from_iter<I: IntoIterator<Item = Delivery>>(iter: I) -> Self {
        let mut plan = CascadePlan::new();
        for delivery in iter {
            plan.add(&delivery.content, &delivery.agent);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_message() {
        assert!(CascadingMessage::new().is_empty());
        assert!(!CascadingMessage::new().with_broadcast("hi").is_empty());
    }

    #[test]
    fn test_message_deserializes_with_missing_fields() {
        let msg: CascadingMessage =
            serde_json::from_str(r#"{"team_messages":{"backend":"ship it"}}"#).unwrap();
        assert!(msg.broadcast.is_none());
        assert_eq!(msg.team_messages.get("backend").unwrap(), "ship it");
        assert!(msg.agent_messages.is_empty());
    }

    #[test]
    fn test_plan_add_dedups_per_content() {
        let mut plan = CascadePlan::new();
        assert!(plan.add("hello", "a"));
        assert!(!plan.add("hello", "a"));
        assert!(plan.add("bye", "a"));
        assert_eq!(plan.delivery_count(), 2);
        assert_eq!(plan.contents_for("a"), vec!["bye", "hello"]);
    }

    #[test]
    fn test_plan_merge() {
        let mut first = CascadePlan::new();
        first.add("deploy", "a");
        first.add("deploy", "b");

        let mut second = CascadePlan::new();
        second.add("deploy", "b");
        second.add("deploy", "c");
        second.add("review", "a");

        first.merge(&second);
        assert_eq!(first.recipients("deploy"), ["a", "b", "c"]);
        assert_eq!(first.recipients("review"), ["a"]);
        assert!(first.recipients("missing").is_empty());
    }

    #[test]
    fn test_delivery_serialization() {
        let delivery = Delivery {
            agent: "a".into(),
            content: "go".into(),
            rule: CascadeRule::TeamMessage("backend".into()),
        };
        let json = serde_json::to_value(&delivery).unwrap();
        assert_eq!(json["rule"], "team_message");
        assert_eq!(json["source"], "backend");
    }
}
