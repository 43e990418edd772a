//! Session providers for Switchboard.
//!
//! A session provider owns live sessions: it types text into them and
//! captures their output. The coordinator only talks to sessions through the
//! [`SessionProvider`] trait.
//!
//! - [`TmuxProvider`] drives real tmux sessions and panes.
//! - [`InMemoryProvider`] keeps sessions in memory for tests and dry runs.

pub mod error;
pub mod memory;
pub mod tmux;
pub mod traits;

pub use error::{ProviderError, Result};
pub use memory::{InMemoryProvider, SentText};
pub use tmux::TmuxProvider;
pub use traits::SessionProvider;
