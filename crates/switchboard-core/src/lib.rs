//! Coordination core for Switchboard.
//!
//! This crate decides who receives a message and in what order work
//! proceeds across many agent sessions:
//! - `Registry` - agents, teams and `team :: agent` addressing
//! - `CascadeResolver` - agent > team > broadcast routing with dedup
//! - `LockManager` - exclusive write access per session
//! - `PlaybookExecutor` - staged parallel/sequential dispatch with read-back
//! - `ColorDistributor` - well-separated team hues
//! - `Coordinator` - facade tying these to a session provider and a store
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchboard_core::{Coordinator, CoordinatorConfig};
//! use switchboard_models::{CascadingMessage, Playbook, PlaybookCommand, PlaybookMessage, SessionTarget};
//! use switchboard_provider::TmuxProvider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(TmuxProvider::new()?);
//!     let coordinator = Coordinator::open("/home/user/.switchboard", provider, CoordinatorConfig::from_env()?)?;
//!
//!     coordinator.create_team("backend", "API and storage")?;
//!     coordinator.spawn_agent("api", &["backend".to_string()]).await?;
//!
//!     let playbook = Playbook::new("build")
//!         .with_command(PlaybookCommand::parallel(
//!             "compile",
//!             vec![PlaybookMessage::new("cargo build", SessionTarget::team("backend"))],
//!         ))
//!         .with_cascade(CascadingMessage::new().with_broadcast("build finished"));
//!
//!     let report = coordinator.run_playbook(&playbook).await?;
//!     println!("{} failures", report.failure_count());
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Registry and lock state sit behind `std::sync::RwLock` and are never held
//! across an `.await`. The only suspension points are calls into the
//! session provider.

pub mod cascade;
pub mod color;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod executor;
pub mod handoff;
pub mod locks;
pub mod monitor;
pub mod redaction;
pub mod registry;
pub mod termination;

pub use cascade::{CascadeResolver, RoutingRule};
pub use color::ColorDistributor;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, TerminationReport};
pub use error::{CoreError, Result};
pub use event::CoordinatorEvent;
pub use executor::{
    CascadeResult, DeliveryOutcome, Dispatch, MessageResult, PlaybookExecutor, PlaybookReport,
    ReadOutcome, StageResult,
};
pub use handoff::HandoffManager;
pub use locks::LockManager;
pub use monitor::{OutputEvent, OutputMonitor};
pub use redaction::SecretRedactor;
pub use registry::{Registry, RegistrySnapshot};
pub use termination::{TerminationCondition, TerminationContext, TerminationSpec};
