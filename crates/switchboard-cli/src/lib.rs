//! Switchboard CLI library.
//!
//! Argument parsing lives in [`cli`]; [`commands`] opens the coordinator
//! over the state directory and runs one subcommand against it.

pub mod cli;
pub mod commands;
pub mod error;

pub use error::{CliError, Result};
