//! Multi-agent coordination primitives: barriers, votes and leader election.

mod barrier;
mod election;
mod voting;

pub use barrier::{Barrier, BarrierManager, BarrierState};
pub use election::{LeaderElection, DEFAULT_PRIORITY};
pub use voting::{TallyStatus, VoteState, VoteTally, VotingRound};
