//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Build version string with git hash and build date.
fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const BUILD_DATE: &str = env!("BUILD_DATE");

    // Format: "0.1.0 (abc1234, 2026-01-29)"
    static VERSION_STRING: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} ({}, {})", VERSION, GIT_HASH, BUILD_DATE))
}

/// Switchboard - route messages and work across many agent sessions
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to state directory
    #[arg(short, long, env = "SWITCHBOARD_STATE_DIR", global = true)]
    pub state_dir: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },

    /// Manage teams
    Team {
        #[command(subcommand)]
        action: TeamCommand,
    },

    /// Route a message by agent, then team, then broadcast
    Cascade {
        /// Message for every agent not addressed more specifically
        #[arg(short, long)]
        broadcast: Option<String>,

        /// Team message as TEAM=MESSAGE (repeatable)
        #[arg(short, long = "team", value_parser = parse_key_value)]
        teams: Vec<(String, String)>,

        /// Agent message as AGENT=MESSAGE (repeatable)
        #[arg(short, long = "agent", value_parser = parse_key_value)]
        agents: Vec<(String, String)>,

        /// Agent sending the cascade; its own locks are not skipped
        #[arg(long)]
        caller: Option<String>,

        /// Show who would receive what without sending
        #[arg(long)]
        dry_run: bool,
    },

    /// Type text into one agent's session
    Send {
        agent: String,
        text: String,

        /// Type without pressing Enter
        #[arg(long)]
        no_enter: bool,

        /// Agent performing the send
        #[arg(long)]
        caller: Option<String>,
    },

    /// Show recent output from an agent's session
    Read {
        agent: String,

        /// Number of lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Lock a session for exclusive writes
    Lock { session: String, agent: String },

    /// Release a session lock
    Unlock { session: String, agent: String },

    /// Run a playbook from a JSON file
    Playbook {
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Preview the colors the next teams would receive
    Color {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },

    /// Create a tmux session and register an agent on it
    Spawn {
        name: String,

        /// Team to join (repeatable)
        #[arg(short, long = "team")]
        teams: Vec<String>,
    },

    /// Hand work from one agent to another
    Handoff {
        source: String,
        target: String,

        #[arg(short, long, default_value = "")]
        reason: String,

        /// Context describing the handed-over work
        #[arg(short, long, default_value = "")]
        context: String,
    },

    /// Acknowledge a handoff as its target
    Ack { id: String, agent: String },

    /// List handoffs waiting for an agent
    Inbox { agent: String },

    /// Watch an agent's session until a condition holds
    Wait {
        agent: String,

        /// JSON file describing the condition
        #[arg(long, conflicts_with_all = ["text", "timeout", "idle", "max_messages"])]
        until: Option<PathBuf>,

        /// Stop when the output mentions this text
        #[arg(long)]
        text: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Stop after this many seconds without new output
        #[arg(long)]
        idle: Option<u64>,

        /// Stop after this many output changes
        #[arg(long)]
        max_messages: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Register an agent on an existing session
    Register {
        name: String,
        session: String,

        /// Team to join (repeatable)
        #[arg(short, long = "team")]
        teams: Vec<String>,
    },

    /// Remove an agent and release its locks
    Remove { name: String },

    /// List agents
    List {
        /// Only members of this team
        #[arg(short, long)]
        team: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TeamCommand {
    /// Create a team and assign it a color
    Create {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Remove a team
    Remove { name: String },

    /// Add an agent to a team
    Assign { agent: String, team: String },

    /// Remove an agent from a team
    Unassign { agent: String, team: String },

    /// List teams
    List,
}

/// Output format for listings and reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Parses `KEY=VALUE`. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=MESSAGE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing name before '=' in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    /// Returns the state directory path, using `~/.switchboard` if not specified.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            None => dirs::home_dir()
                .map(|h| h.join(".switchboard"))
                .unwrap_or_else(|| PathBuf::from(".switchboard")),
        }
    }

    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_cascade() {
        let cli = Cli::parse_from([
            "switchboard",
            "cascade",
            "--broadcast",
            "sync up",
            "--team",
            "backend=run migrations",
            "-a",
            "api=set FOO=1",
            "--dry-run",
        ]);
        match cli.command {
            Commands::Cascade {
                broadcast,
                teams,
                agents,
                dry_run,
                caller,
            } => {
                assert_eq!(broadcast.as_deref(), Some("sync up"));
                assert_eq!(teams, vec![("backend".into(), "run migrations".into())]);
                assert_eq!(agents, vec![("api".into(), "set FOO=1".into())]);
                assert!(dry_run);
                assert!(caller.is_none());
            }
            _ => panic!("Expected Cascade command"),
        }
    }

    #[test]
    fn test_cli_parse_agent_register() {
        let cli = Cli::parse_from([
            "switchboard",
            "agent",
            "register",
            "api",
            "%3",
            "-t",
            "backend",
            "--team",
            "oncall",
        ]);
        match cli.command {
            Commands::Agent {
                action: AgentCommand::Register { name, session, teams },
            } => {
                assert_eq!(name, "api");
                assert_eq!(session, "%3");
                assert_eq!(teams, vec!["backend", "oncall"]);
            }
            _ => panic!("Expected agent register"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["switchboard", "team", "list", "--format", "json", "-vv"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_wait_until_conflicts_with_flags() {
        let result = Cli::try_parse_from([
            "switchboard",
            "wait",
            "api",
            "--until",
            "cond.json",
            "--timeout",
            "5",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("web=npm test").unwrap(),
            ("web".to_string(), "npm test".to_string())
        );
        assert_eq!(parse_key_value(" a =").unwrap(), ("a".to_string(), String::new()));
        assert!(parse_key_value("no separator").is_err());
        assert!(parse_key_value("=orphan").is_err());
    }

    #[test]
    fn test_state_dir_expands_tilde() {
        let cli = Cli::parse_from(["switchboard", "--state-dir", "~/sb", "team", "list"]);
        let dir = cli.state_dir();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("sb"));
    }

    #[test]
    fn test_cli_help() {
        Cli::command().debug_assert();
    }
}
