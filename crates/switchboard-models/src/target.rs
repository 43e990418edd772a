//! Recipient selectors.
//!
//! A [`SessionTarget`] is a disjunction of selectors. Each selector names
//! recipients one way: by session handle, by agent name, or by team.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One way of naming recipients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// The agent bound to the session with this handle.
    Name(String),
    /// The agent with this name.
    Agent(String),
    /// Every member of this team.
    Team(String),
}

impl Selector {
    /// Returns the selector's value.
    pub fn value(&self) -> &str {
        match self {
            Selector::Name(v) | Selector::Agent(v) | Selector::Team(v) => v,
        }
    }

    /// Returns the selector kind as a lowercase string.
    pub fn kind(&self) -> &'static str {
        match self {
            Selector::Name(_) => "name",
            Selector::Agent(_) => "agent",
            Selector::Team(_) => "team",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind(), self.value())
    }
}

/// A set of selectors whose matches are unioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTarget {
    pub selectors: Vec<Selector>,
}

impl SessionTarget {
    /// Creates an empty target. An empty target does not validate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a single agent by name.
    pub fn agent(name: impl Into<String>) -> Self {
        Self::new().with_agent(name)
    }

    /// Target every member of a team.
    pub fn team(name: impl Into<String>) -> Self {
        Self::new().with_team(name)
    }

    /// Target the agent bound to a session handle.
    pub fn name(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    /// Adds an agent selector.
    pub fn with_agent(mut self, name: impl Into<String>) -> Self {
        self.selectors.push(Selector::Agent(name.into()));
        self
    }

    /// Adds a team selector.
    pub fn with_team(mut self, name: impl Into<String>) -> Self {
        self.selectors.push(Selector::Team(name.into()));
        self
    }

    /// Adds a session-name selector.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.selectors.push(Selector::Name(name.into()));
        self
    }

    /// Checks that at least one selector is present and none is blank.
    pub fn validate(&self) -> Result<(), String> {
        if self.selectors.is_empty() {
            return Err("target has no selectors".to_string());
        }
        if let Some(blank) = self.selectors.iter().find(|s| s.value().trim().is_empty()) {
            return Err(format!("{} selector has an empty value", blank.kind()));
        }
        Ok(())
    }

    /// Team names referenced by this target.
    pub fn teams(&self) -> impl Iterator<Item = &str> {
        self.selectors.iter().filter_map(|s| match s {
            Selector::Team(t) => Some(t.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.selectors.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
