//! Persistence layer for Switchboard.
//!
//! Registry state is loaded at startup and saved on every mutation. Writes
//! are crash-safe (write to a temp file, then rename).
//!
//! # Example
//!
//! ```no_run
//! use switchboard_persistence::RegistryStore;
//! use switchboard_models::Agent;
//!
//! let store = RegistryStore::new("/home/user/.switchboard");
//! store.save_agent(&Agent::new("builder", "%1")).unwrap();
//!
//! let agents = store.load_agents().unwrap();
//! assert_eq!(agents[0].name, "builder");
//! ```

pub mod atomic;
pub mod error;
pub mod handoff_log;
pub mod registry_store;

pub use error::{PersistenceError, Result};
pub use handoff_log::HandoffLog;
pub use registry_store::{RegistryStore, StateLock};
