//! Priority-based leader election.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::registry::Registry;

/// Priority used for candidates without an explicit one. Lower wins.
pub const DEFAULT_PRIORITY: u32 = 100;

/// Elects the highest-priority candidate that is still registered.
#[derive(Debug, Clone, Default)]
pub struct LeaderElection {
    candidates: Vec<String>,
    priorities: HashMap<String, u32>,
    leader: Option<String>,
    term: u64,
    elected_at: Option<DateTime<Utc>>,
}

impl LeaderElection {
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets a candidate's priority.
    pub fn with_priority(mut self, candidate: impl Into<String>, priority: u32) -> Self {
        self.priorities.insert(candidate.into(), priority);
        self
    }

    fn priority(&self, candidate: &str) -> u32 {
        self.priorities
            .get(candidate)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY)
    }

    /// Runs an election.
    ///
    /// Candidates are ordered by priority, keeping list order among equals;
    /// the first one registered in `registry` becomes leader and the term
    /// advances. With no eligible candidate the current leader is cleared.
    pub fn elect(&mut self, registry: &Registry) -> Result<Option<String>> {
        let mut ordered: Vec<&String> = self.candidates.iter().collect();
        ordered.sort_by_key(|c| self.priority(c));

        for candidate in ordered {
            if registry.contains_agent(candidate)? {
                let leader = candidate.clone();
                self.term += 1;
                self.elected_at = Some(Utc::now());
                self.leader = Some(leader.clone());
                info!(leader = %leader, term = self.term, "Leader elected");
                return Ok(Some(leader));
            }
        }

        warn!(candidates = self.candidates.len(), "No eligible leader");
        self.leader = None;
        Ok(None)
    }

    pub fn step_down(&mut self) {
        self.leader = None;
    }

    pub fn is_leader(&self, agent: &str) -> bool {
        self.leader.as_deref() == Some(agent)
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn elected_at(&self) -> Option<DateTime<Utc>> {
        self.elected_at
    }
}
