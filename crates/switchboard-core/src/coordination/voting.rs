//! Voting rounds among agents.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_models::VoteId;
use tracing::debug;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteState {
    Open,
    Closed,
    Cancelled,
}

/// Where a round stands when tallied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyStatus {
    NoVotes,
    InProgress,
    Complete,
}

/// Detailed counts for a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteTally {
    pub status: TallyStatus,
    pub total_votes: usize,
    pub total_voters: usize,
    /// Share of voters who voted, 0.0 to 1.0.
    pub participation: f64,
    pub counts: BTreeMap<String, usize>,
    pub winner: Option<String>,
    /// Options sharing the top count when there is a tie.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tied_options: Vec<String>,
}

impl VoteTally {
    pub fn is_tie(&self) -> bool {
        self.tied_options.len() > 1
    }
}

/// A question put to a fixed set of voters.
///
/// Voters may change their vote while the round is open. With
/// `require_all_votes` the round closes itself once everyone has voted and
/// has no result before that.
#[derive(Debug, Clone)]
pub struct VotingRound {
    pub id: VoteId,
    pub question: String,
    pub options: Vec<String>,
    pub voters: BTreeSet<String>,
    pub require_all_votes: bool,
    /// `(voter, option)` in order of each voter's first vote.
    votes: Vec<(String, String)>,
    state: VoteState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl VotingRound {
    /// Opens a round that requires every voter.
    ///
    /// # Errors
    ///
    /// `Validation` when there are no options or no voters.
    pub fn new<O, V>(question: impl Into<String>, options: O, voters: V) -> Result<Self>
    where
        O: IntoIterator,
        O::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let mut unique = Vec::new();
        for option in options.into_iter().map(Into::into) {
            if !unique.contains(&option) {
                unique.push(option);
            }
        }
        let voters: BTreeSet<String> = voters.into_iter().map(Into::into).collect();
        if unique.is_empty() {
            return Err(CoreError::validation("a vote needs at least one option"));
        }
        if voters.is_empty() {
            return Err(CoreError::validation("a vote needs at least one voter"));
        }

        Ok(Self {
            id: VoteId::new(),
            question: question.into(),
            options: unique,
            voters,
            require_all_votes: true,
            votes: Vec::new(),
            state: VoteState::Open,
            created_at: Utc::now(),
            closed_at: None,
        })
    }

    /// Allows a result before every voter has voted.
    pub fn allow_partial(mut self) -> Self {
        self.require_all_votes = false;
        self
    }

    pub fn state(&self) -> VoteState {
        self.state
    }

    /// Records or changes `voter`'s vote.
    ///
    /// Returns `false` when the round is not open, or the voter or option
    /// is unknown.
    pub fn cast(&mut self, voter: &str, option: &str) -> bool {
        if self.state != VoteState::Open
            || !self.voters.contains(voter)
            || !self.options.iter().any(|o| o == option)
        {
            return false;
        }

        match self.votes.iter_mut().find(|(v, _)| v == voter) {
            Some((_, chosen)) => *chosen = option.to_string(),
            None => self.votes.push((voter.to_string(), option.to_string())),
        }
        debug!(vote = %self.id, voter = %voter, option = %option, "Vote cast");

        if self.require_all_votes && self.votes.len() == self.voters.len() {
            self.close();
        }
        true
    }

    pub fn close(&mut self) {
        if self.state == VoteState::Open {
            self.state = VoteState::Closed;
            self.closed_at = Some(Utc::now());
        }
    }

    pub fn cancel(&mut self) {
        self.state = VoteState::Cancelled;
    }

    /// Vote of `voter`, if cast.
    pub fn vote_of(&self, voter: &str) -> Option<&str> {
        self.votes
            .iter()
            .find(|(v, _)| v == voter)
            .map(|(_, o)| o.as_str())
    }

    /// Voters who have not voted yet, sorted.
    pub fn missing_votes(&self) -> Vec<String> {
        self.voters
            .iter()
            .filter(|v| self.vote_of(v).is_none())
            .cloned()
            .collect()
    }

    /// Counts in order of first appearance.
    fn ordered_counts(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for (_, option) in &self.votes {
            match counts.iter_mut().find(|entry| entry.0 == option.as_str()) {
                Some((_, n)) => *n += 1,
                None => counts.push((option.as_str(), 1)),
            }
        }
        counts
    }

    /// The winning option.
    ///
    /// `None` while votes are missing (when all are required), when nobody
    /// voted, or when the round was cancelled. Ties go to the option that
    /// received a vote first.
    pub fn result(&self) -> Option<String> {
        if self.state == VoteState::Cancelled
            || (self.require_all_votes && self.votes.len() < self.voters.len())
        {
            return None;
        }

        let mut winner: Option<(&str, usize)> = None;
        for (option, count) in self.ordered_counts() {
            if winner.map_or(true, |(_, best)| count > best) {
                winner = Some((option, count));
            }
        }
        winner.map(|(option, _)| option.to_string())
    }

    pub fn tally(&self) -> VoteTally {
        let ordered = self.ordered_counts();
        let top = ordered.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let tied_options: Vec<String> = ordered
            .iter()
            .filter(|(_, n)| *n == top && top > 0)
            .map(|(o, _)| o.to_string())
            .collect();

        let status = if self.votes.is_empty() {
            TallyStatus::NoVotes
        } else if self.state == VoteState::Closed {
            TallyStatus::Complete
        } else {
            TallyStatus::InProgress
        };

        VoteTally {
            status,
            total_votes: self.votes.len(),
            total_voters: self.voters.len(),
            participation: self.votes.len() as f64 / self.voters.len() as f64,
            counts: ordered
                .iter()
                .map(|(o, n)| (o.to_string(), *n))
                .collect(),
            winner: self.result(),
            tied_options: if tied_options.len() > 1 {
                tied_options
            } else {
                Vec::new()
            },
        }
    }
}
