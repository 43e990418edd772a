//! Agent and team registry.
//!
//! The registry is the single source of truth for identities and
//! membership. It is an explicitly constructed value shared through `Arc`;
//! every mutation takes the write lock, reads share the read lock, and no
//! operation suspends while holding either.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use switchboard_models::{Agent, HierarchyPath, Selector, SessionId, SessionTarget, Team, TeamColor};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

#[derive(Debug, Default, Clone)]
struct RegistryState {
    agents: HashMap<String, Agent>,
    agent_order: Vec<String>,
    teams: HashMap<String, Team>,
    team_order: Vec<String>,
}

impl RegistryState {
    fn agent(&self, name: &str) -> Result<&Agent> {
        self.agents
            .get(name)
            .ok_or_else(|| CoreError::not_found("agent", name))
    }

    fn team(&self, name: &str) -> Result<&Team> {
        self.teams
            .get(name)
            .ok_or_else(|| CoreError::not_found("team", name))
    }

    fn ordered_agents(&self) -> impl Iterator<Item = &Agent> {
        self.agent_order
            .iter()
            .filter_map(|name| self.agents.get(name))
    }

    fn ordered_teams(&self) -> impl Iterator<Item = &Team> {
        self.team_order.iter().filter_map(|name| self.teams.get(name))
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            agents: self.ordered_agents().cloned().collect(),
            teams: self.ordered_teams().cloned().collect(),
        }
    }
}

/// An immutable copy of registry state, in insertion order.
///
/// Pure algorithms such as cascade resolution run against a snapshot so
/// that their output depends only on their input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub agents: Vec<Agent>,
    pub teams: Vec<Team>,
}

impl RegistrySnapshot {
    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn team(&self, name: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.name == name)
    }
}

/// Registry of agents and teams.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::validation(format!("{} name must not be empty", kind)));
    }
    Ok(())
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from persisted records.
    ///
    /// Records are taken in the given order. Membership is reconciled from
    /// both sides; edges pointing at records that no longer exist are
    /// dropped.
    pub fn from_records(agents: Vec<Agent>, teams: Vec<Team>) -> Self {
        let mut state = RegistryState::default();

        for mut team in teams {
            team.members.clear();
            state.team_order.push(team.name.clone());
            state.teams.insert(team.name.clone(), team);
        }

        for mut agent in agents {
            if state.agents.contains_key(&agent.name) {
                warn!(agent = %agent.name, "Duplicate agent record ignored");
                continue;
            }
            agent.teams.retain(|team| {
                let known = state.teams.contains_key(team);
                if !known {
                    warn!(agent = %agent.name, team = %team, "Dropping membership in unknown team");
                }
                known
            });
            for team in &agent.teams {
                if let Some(t) = state.teams.get_mut(team) {
                    t.members.insert(agent.name.clone());
                }
            }
            state.agent_order.push(agent.name.clone());
            state.agents.insert(agent.name.clone(), agent);
        }

        debug!(
            agents = state.agent_order.len(),
            teams = state.team_order.len(),
            "Registry restored"
        );
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    // ==================== Agents ====================

    /// Registers an agent bound to `session_id` and adds it to `teams`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a duplicate name, `NotFound` if any team is
    /// unknown (nothing is registered), `Validation` for blank input.
    pub fn register_agent(
        &self,
        name: &str,
        session_id: SessionId,
        teams: &[String],
    ) -> Result<Agent> {
        require_name("agent", name)?;
        if session_id.as_str().trim().is_empty() {
            return Err(CoreError::validation("session id must not be empty"));
        }

        let mut state = self.write()?;
        if state.agents.contains_key(name) {
            return Err(CoreError::already_exists("agent", name));
        }
        for team in teams {
            state.team(team)?;
        }

        let mut agent = Agent::new(name, session_id);
        for team in teams {
            agent.teams.insert(team.clone());
            if let Some(t) = state.teams.get_mut(team) {
                t.members.insert(name.to_string());
            }
        }

        state.agent_order.push(name.to_string());
        state.agents.insert(name.to_string(), agent.clone());
        debug!(agent = %name, session = %agent.session_id, teams = ?teams, "Agent registered");
        Ok(agent)
    }

    /// Removes an agent and severs its team memberships.
    pub fn remove_agent(&self, name: &str) -> Result<Agent> {
        let mut state = self.write()?;
        let agent = state
            .agents
            .remove(name)
            .ok_or_else(|| CoreError::not_found("agent", name))?;
        state.agent_order.retain(|n| n != name);
        for team in &agent.teams {
            if let Some(t) = state.teams.get_mut(team) {
                t.members.remove(name);
            }
        }
        debug!(agent = %name, "Agent removed");
        Ok(agent)
    }

    /// Returns the agent with `name`.
    pub fn get_agent(&self, name: &str) -> Result<Agent> {
        self.read()?.agent(name).cloned()
    }

    /// Returns true if an agent with `name` is registered.
    pub fn contains_agent(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.agents.contains_key(name))
    }

    /// Lists agents in registration order, optionally limited to a team.
    ///
    /// # Errors
    ///
    /// `NotFound` if the team filter names an unknown team.
    pub fn list_agents(&self, team: Option<&str>) -> Result<Vec<Agent>> {
        let state = self.read()?;
        match team {
            None => Ok(state.ordered_agents().cloned().collect()),
            Some(team) => {
                state.team(team)?;
                Ok(state
                    .ordered_agents()
                    .filter(|a| a.is_member_of(team))
                    .cloned()
                    .collect())
            }
        }
    }

    /// Agents bound to `session`, in registration order.
    pub fn agents_for_session(&self, session: &SessionId) -> Result<Vec<Agent>> {
        Ok(self
            .read()?
            .ordered_agents()
            .filter(|a| &a.session_id == session)
            .cloned()
            .collect())
    }

    // ==================== Teams ====================

    /// Creates an empty team.
    pub fn create_team(&self, name: &str, description: &str) -> Result<Team> {
        require_name("team", name)?;

        let mut state = self.write()?;
        if state.teams.contains_key(name) {
            return Err(CoreError::already_exists("team", name));
        }

        let team = Team::new(name, description);
        state.team_order.push(name.to_string());
        state.teams.insert(name.to_string(), team.clone());
        debug!(team = %name, "Team created");
        Ok(team)
    }

    /// Removes a team. Member agents stay registered without the edge.
    pub fn remove_team(&self, name: &str) -> Result<Team> {
        let mut state = self.write()?;
        let team = state
            .teams
            .remove(name)
            .ok_or_else(|| CoreError::not_found("team", name))?;
        state.team_order.retain(|n| n != name);
        for member in &team.members {
            if let Some(agent) = state.agents.get_mut(member) {
                agent.teams.remove(name);
            }
        }
        debug!(team = %name, members = team.members.len(), "Team removed");
        Ok(team)
    }

    pub fn get_team(&self, name: &str) -> Result<Team> {
        self.read()?.team(name).cloned()
    }

    /// Lists teams in creation order.
    pub fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.read()?.ordered_teams().cloned().collect())
    }

    /// Sets the display color of a team.
    pub fn set_team_color(&self, name: &str, color: TeamColor) -> Result<Team> {
        let mut state = self.write()?;
        let team = state
            .teams
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found("team", name))?;
        team.color = Some(color);
        Ok(team.clone())
    }

    /// Adds `agent` to `team`. Returns false if it was already a member.
    pub fn assign_agent_to_team(&self, agent: &str, team: &str) -> Result<bool> {
        let mut state = self.write()?;
        state.agent(agent)?;
        state.team(team)?;

        let added = state
            .agents
            .get_mut(agent)
            .map(|a| a.teams.insert(team.to_string()))
            .unwrap_or(false);
        if let Some(t) = state.teams.get_mut(team) {
            t.members.insert(agent.to_string());
        }
        debug!(agent = %agent, team = %team, added, "Agent assigned to team");
        Ok(added)
    }

    /// Removes `agent` from `team`. Returns false if it was not a member.
    pub fn remove_agent_from_team(&self, agent: &str, team: &str) -> Result<bool> {
        let mut state = self.write()?;
        state.agent(agent)?;
        state.team(team)?;

        let removed = state
            .agents
            .get_mut(agent)
            .map(|a| a.teams.remove(team))
            .unwrap_or(false);
        if let Some(t) = state.teams.get_mut(team) {
            t.members.remove(agent);
        }
        debug!(agent = %agent, team = %team, removed, "Agent removed from team");
        Ok(removed)
    }

    // ==================== Resolution ====================

    /// Validates a target and checks that every team it names exists.
    pub fn check_target(&self, target: &SessionTarget) -> Result<()> {
        target.validate().map_err(CoreError::Validation)?;
        let state = self.read()?;
        for team in target.teams() {
            state.team(team)?;
        }
        Ok(())
    }

    /// Resolves a target to the union of matching agents.
    ///
    /// Agents come back in registration order without duplicates. Unknown
    /// names and teams simply match nothing.
    pub fn resolve_target(&self, target: &SessionTarget) -> Result<Vec<Agent>> {
        target.validate().map_err(CoreError::Validation)?;
        let state = self.read()?;

        let mut matched: HashSet<&str> = HashSet::new();
        for selector in &target.selectors {
            match selector {
                Selector::Agent(name) => {
                    if state.agents.contains_key(name) {
                        matched.insert(name.as_str());
                    }
                }
                Selector::Team(team) => {
                    if let Some(t) = state.teams.get(team) {
                        matched.extend(t.members.iter().map(String::as_str));
                    }
                }
                Selector::Name(session) => {
                    matched.extend(
                        state
                            .agents
                            .values()
                            .filter(|a| a.session_id.as_str() == session.as_str())
                            .map(|a| a.name.as_str()),
                    );
                }
            }
        }

        Ok(state
            .ordered_agents()
            .filter(|a| matched.contains(a.name.as_str()))
            .cloned()
            .collect())
    }

    /// Resolves a `team :: agent` path.
    ///
    /// # Errors
    ///
    /// `NotFound` unless the team exists and the agent is one of its members.
    pub fn resolve_hierarchy(&self, path: &HierarchyPath) -> Result<Agent> {
        let state = self.read()?;
        let team = state.team(&path.team)?;
        if !team.members.contains(&path.agent) {
            return Err(CoreError::not_found("agent", path.to_string()));
        }
        state.agent(&path.agent).cloned()
    }

    /// Copies the current state.
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        Ok(self.read()?.snapshot())
    }
}
