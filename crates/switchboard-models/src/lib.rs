//! Core data models for Switchboard.
//!
//! This crate provides the plain data types shared by every other crate:
//! agents and teams, recipient selectors, cascading messages, playbooks and
//! lock records. Everything here is serde-serializable and free of I/O.

pub mod agent;
pub mod cascade;
pub mod handoff;
pub mod ids;
pub mod lock;
pub mod playbook;
pub mod target;

// Re-export main types
pub use agent::{Agent, HierarchyPath, Team, TeamColor, HIERARCHY_SEPARATOR};
pub use cascade::{CascadePlan, CascadeRule, CascadingMessage, Delivery};
pub use handoff::Handoff;
pub use ids::{BarrierId, HandoffId, RequestId, SessionId, VoteId};
pub use lock::{AccessRequest, LockRecord, LockTable};
pub use playbook::{Playbook, PlaybookCommand, PlaybookMessage};
pub use target::{Selector, SessionTarget};
