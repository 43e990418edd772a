//! Switchboard CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use switchboard_cli::cli::Cli;
use switchboard_cli::{commands, CliError};

fn main() {
    // Load .env.local if it exists (SWITCHBOARD_* overrides)
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let state_dir = cli.state_dir();

    let result = tokio::runtime::Runtime::new()
        .map_err(CliError::Runtime)
        .and_then(|runtime| runtime.block_on(commands::execute(cli.command, &state_dir, cli.format)));

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
