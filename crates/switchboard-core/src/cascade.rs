//! Cascade resolution.
//!
//! Each agent is run through an ordered list of routing rules; the first
//! rule that yields a message wins. The default order is direct agent
//! message, then team message, then broadcast.

use switchboard_models::{Agent, CascadePlan, CascadeRule, CascadingMessage, Delivery};

use crate::error::{CoreError, Result};
use crate::registry::RegistrySnapshot;

/// One routing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingRule {
    /// The agent's own entry in `agent_messages`.
    AgentDirect,
    /// The first of the agent's teams (by name) present in `team_messages`.
    TeamMessage,
    /// The broadcast, if any.
    Broadcast,
}

impl RoutingRule {
    /// Rules in evaluation order.
    pub const PRIORITY: [RoutingRule; 3] = [
        RoutingRule::AgentDirect,
        RoutingRule::TeamMessage,
        RoutingRule::Broadcast,
    ];

    /// Returns the delivery this rule produces for `agent`, if any.
    pub fn apply(&self, agent: &Agent, message: &CascadingMessage) -> Option<Delivery> {
        let (content, rule) = match self {
            RoutingRule::AgentDirect => (
                message.agent_messages.get(&agent.name)?,
                CascadeRule::AgentDirect,
            ),
            RoutingRule::TeamMessage => {
                // agent.teams is a BTreeSet so iteration is lexicographic
                let (team, content) = agent
                    .teams
                    .iter()
                    .find_map(|team| message.team_messages.get(team).map(|c| (team, c)))?;
                (content, CascadeRule::TeamMessage(team.clone()))
            }
            RoutingRule::Broadcast => (message.broadcast.as_ref()?, CascadeRule::Broadcast),
        };

        Some(Delivery {
            agent: agent.name.clone(),
            content: content.clone(),
            rule,
        })
    }
}

/// Resolves cascading messages against a registry snapshot.
#[derive(Debug, Clone)]
pub struct CascadeResolver {
    rules: Vec<RoutingRule>,
}

impl Default for CascadeResolver {
    fn default() -> Self {
        Self {
            rules: RoutingRule::PRIORITY.to_vec(),
        }
    }
}

impl CascadeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the message shape and that every named team and agent exists.
    pub fn validate(&self, message: &CascadingMessage, snapshot: &RegistrySnapshot) -> Result<()> {
        if message.is_empty() {
            return Err(CoreError::validation(
                "cascade has no broadcast, team or agent messages",
            ));
        }
        if let Some(team) = message
            .team_messages
            .keys()
            .find(|team| snapshot.team(team).is_none())
        {
            return Err(CoreError::not_found("team", team.as_str()));
        }
        if let Some(agent) = message
            .agent_messages
            .keys()
            .find(|agent| snapshot.agent(agent).is_none())
        {
            return Err(CoreError::not_found("agent", agent.as_str()));
        }
        Ok(())
    }

    /// Returns one delivery per addressed agent, in registration order,
    /// along with the rule that selected it.
    pub fn explain(
        &self,
        message: &CascadingMessage,
        snapshot: &RegistrySnapshot,
    ) -> Result<Vec<Delivery>> {
        self.validate(message, snapshot)?;

        Ok(snapshot
            .agents
            .iter()
            .filter_map(|agent| self.rules.iter().find_map(|rule| rule.apply(agent, message)))
            .collect())
    }

    /// Resolves a message to a content-keyed delivery plan.
    pub fn resolve(
        &self,
        message: &CascadingMessage,
        snapshot: &RegistrySnapshot,
    ) -> Result<CascadePlan> {
        Ok(self.explain(message, snapshot)?.into_iter().collect())
    }

    /// Resolves several messages and merges the plans.
    ///
    /// An agent may end up with several contents, never the same content
    /// twice.
    pub fn resolve_all(
        &self,
        messages: &[CascadingMessage],
        snapshot: &RegistrySnapshot,
    ) -> Result<CascadePlan> {
        let mut plan = CascadePlan::new();
        for message in messages {
            plan.merge(&self.resolve(message, snapshot)?);
        }
        Ok(plan)
    }
}
