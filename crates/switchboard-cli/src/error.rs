//! Error type for CLI commands.

use std::path::PathBuf;

use switchboard_core::CoreError;
use switchboard_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),

    #[error("failed to start async runtime: {0}")]
    Runtime(std::io::Error),
}

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, CliError>;
