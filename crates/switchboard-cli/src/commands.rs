//! Command handlers for CLI subcommands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use switchboard_core::{
    Coordinator, CoordinatorConfig, DeliveryOutcome, PlaybookReport, ReadOutcome, TerminationCondition,
    TerminationSpec,
};
use switchboard_models::{CascadingMessage, HandoffId, Playbook, SessionId};
use switchboard_provider::{InMemoryProvider, SessionProvider, TmuxProvider};
use tracing::{debug, info};

use crate::cli::{AgentCommand, Commands, OutputFormat, TeamCommand};
use crate::error::{CliError, Result};

/// Execute a CLI command against the state in `state_dir`.
pub async fn execute(command: Commands, state_dir: &Path, format: OutputFormat) -> Result<()> {
    let coordinator = open_coordinator(state_dir, needs_sessions(&command))?;

    match command {
        Commands::Agent { action } => cmd_agent(&coordinator, action, format),
        Commands::Team { action } => cmd_team(&coordinator, action, format),
        Commands::Cascade {
            broadcast,
            teams,
            agents,
            caller,
            dry_run,
        } => {
            let message = build_cascade(broadcast, teams, agents)?;
            cmd_cascade(&coordinator, &message, caller.as_deref(), dry_run, format).await
        }
        Commands::Send {
            agent,
            text,
            no_enter,
            caller,
        } => {
            coordinator
                .send_to_agent(&agent, &text, !no_enter, caller.as_deref())
                .await?;
            println!("Sent to '{}'", agent);
            Ok(())
        }
        Commands::Read { agent, lines } => {
            let output = coordinator.read_agent(&agent, lines).await?;
            println!("{}", output);
            Ok(())
        }
        Commands::Lock { session, agent } => cmd_lock(&coordinator, &session, &agent),
        Commands::Unlock { session, agent } => {
            if coordinator.unlock_session(&SessionId::from(session.as_str()), &agent)? {
                println!("Unlocked {}", session);
            } else {
                println!("{} was not locked", session);
            }
            Ok(())
        }
        Commands::Playbook { file } => cmd_playbook(&coordinator, &file, format).await,
        Commands::Color { count } => cmd_color(&coordinator, count, format),
        Commands::Spawn { name, teams } => {
            let agent = coordinator.spawn_agent(&name, &teams).await?;
            info!(agent = %agent.name, session = %agent.session_id, "Spawned agent");
            render(format, &agent, || {
                println!("Spawned '{}' on session {}", agent.name, agent.session_id)
            })
        }
        Commands::Handoff {
            source,
            target,
            reason,
            context,
        } => {
            let handoff = coordinator
                .initiate_handoff(&source, &target, &context, &reason)
                .await?;
            render(format, &handoff, || {
                println!("Handoff {} from '{}' to '{}'", handoff.id, source, target)
            })
        }
        Commands::Ack { id, agent } => {
            if coordinator.acknowledge_handoff(&HandoffId::from_string(id.clone()), &agent)? {
                println!("Acknowledged {}", id);
                Ok(())
            } else {
                Err(CliError::Usage(format!("Handoff not found: {}", id)))
            }
        }
        Commands::Inbox { agent } => {
            let pending = coordinator.pending_handoffs(&agent)?;
            render(format, &pending, || {
                if pending.is_empty() {
                    println!("No pending handoffs for '{}'.", agent);
                    return;
                }
                for handoff in &pending {
                    println!(
                        "{}  from {:<16}  {}",
                        handoff.id,
                        truncate(&handoff.source, 16),
                        handoff.reason
                    );
                }
            })
        }
        Commands::Wait {
            agent,
            until,
            text,
            timeout,
            idle,
            max_messages,
        } => {
            let condition = match until {
                Some(path) => load_json::<TerminationSpec>(&path)?.compile()?,
                None => condition_from_flags(text, timeout, idle, max_messages)?,
            };
            let report = coordinator.await_termination(&agent, &condition).await?;
            render(format, &report, || {
                println!(
                    "'{}' met {} after {} ms ({} output changes)",
                    report.agent, report.condition, report.elapsed_ms, report.message_count
                )
            })
        }
    }
}

/// Commands that type into or read from real sessions.
fn needs_sessions(command: &Commands) -> bool {
    match command {
        Commands::Cascade { dry_run, .. } => !dry_run,
        Commands::Send { .. }
        | Commands::Read { .. }
        | Commands::Playbook { .. }
        | Commands::Spawn { .. }
        | Commands::Handoff { .. }
        | Commands::Wait { .. } => true,
        _ => false,
    }
}

fn open_coordinator(state_dir: &Path, needs_sessions: bool) -> Result<Coordinator> {
    let provider: Arc<dyn SessionProvider> = if needs_sessions {
        Arc::new(TmuxProvider::new()?)
    } else {
        Arc::new(InMemoryProvider::new())
    };
    debug!(
        state_dir = %state_dir.display(),
        provider = provider.name(),
        "Opening coordinator"
    );
    let config = CoordinatorConfig::from_env()?;
    Ok(Coordinator::open(state_dir, provider, config)?)
}

/// Builds a cascade from command-line parts. At least one part is required.
pub fn build_cascade(
    broadcast: Option<String>,
    teams: Vec<(String, String)>,
    agents: Vec<(String, String)>,
) -> Result<CascadingMessage> {
    let mut message = CascadingMessage::new();
    if let Some(content) = broadcast {
        message = message.with_broadcast(content);
    }
    for (team, content) in teams {
        message = message.with_team(team, content);
    }
    for (agent, content) in agents {
        message = message.with_agent(agent, content);
    }
    if message.is_empty() {
        return Err(CliError::Usage(
            "nothing to send: pass --broadcast, --team or --agent".to_string(),
        ));
    }
    Ok(message)
}

/// Combines the `wait` flags; any one of them ends the wait.
pub fn condition_from_flags(
    text: Option<String>,
    timeout: Option<u64>,
    idle: Option<u64>,
    max_messages: Option<usize>,
) -> Result<TerminationCondition> {
    let mut conditions = Vec::new();
    if let Some(text) = text {
        if text.is_empty() {
            return Err(CliError::Usage("--text must not be empty".to_string()));
        }
        conditions.push(TerminationCondition::text_mention(text, false));
    }
    if let Some(secs) = timeout {
        conditions.push(TerminationCondition::timeout(Duration::from_secs(secs))?);
    }
    if let Some(secs) = idle {
        conditions.push(TerminationCondition::no_output_for(Duration::from_secs(secs))?);
    }
    if let Some(count) = max_messages {
        conditions.push(TerminationCondition::max_messages(count)?);
    }

    let mut conditions = conditions.into_iter();
    let first = conditions.next().ok_or_else(|| {
        CliError::Usage(
            "no stop condition: pass --until or one of --text, --timeout, --idle, --max-messages"
                .to_string(),
        )
    })?;
    Ok(conditions.fold(first, TerminationCondition::or))
}

fn cmd_agent(coordinator: &Coordinator, action: AgentCommand, format: OutputFormat) -> Result<()> {
    match action {
        AgentCommand::Register {
            name,
            session,
            teams,
        } => {
            let agent = coordinator.register_agent(&name, SessionId::from(session.as_str()), &teams)?;
            render(format, &agent, || {
                println!("Registered '{}' on session {}", agent.name, agent.session_id)
            })
        }
        AgentCommand::Remove { name } => {
            let agent = coordinator.remove_agent(&name)?;
            println!("Removed '{}' ({})", agent.name, agent.session_id);
            Ok(())
        }
        AgentCommand::List { team } => {
            let agents = coordinator.list_agents(team.as_deref())?;
            render(format, &agents, || {
                if agents.is_empty() {
                    println!("No agents found.");
                    return;
                }
                println!("{:<20}  {:<12}  {:<12}  TEAMS", "NAME", "SESSION", "LOCKED BY");
                println!("{}", "-".repeat(70));
                for agent in &agents {
                    let owner = coordinator
                        .locks()
                        .owner(&agent.session_id)
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| "-".to_string());
                    let teams: Vec<&str> = agent.teams.iter().map(String::as_str).collect();
                    println!(
                        "{:<20}  {:<12}  {:<12}  {}",
                        truncate(&agent.name, 20),
                        truncate(agent.session_id.as_str(), 12),
                        truncate(&owner, 12),
                        teams.join(", ")
                    );
                }
                println!("\n{} agent(s)", agents.len());
            })
        }
    }
}

fn cmd_team(coordinator: &Coordinator, action: TeamCommand, format: OutputFormat) -> Result<()> {
    match action {
        TeamCommand::Create { name, description } => {
            let team = coordinator.create_team(&name, &description)?;
            render(format, &team, || {
                let color = team
                    .color
                    .map(|c| c.to_hex())
                    .unwrap_or_else(|| "-".to_string());
                println!("Created team '{}' ({})", team.name, color)
            })
        }
        TeamCommand::Remove { name } => {
            let team = coordinator.remove_team(&name)?;
            println!("Removed team '{}' ({} member(s) released)", team.name, team.members.len());
            Ok(())
        }
        TeamCommand::Assign { agent, team } => {
            if coordinator.assign_agent_to_team(&agent, &team)? {
                println!("Added '{}' to '{}'", agent, team);
            } else {
                println!("'{}' is already in '{}'", agent, team);
            }
            Ok(())
        }
        TeamCommand::Unassign { agent, team } => {
            if coordinator.remove_agent_from_team(&agent, &team)? {
                println!("Removed '{}' from '{}'", agent, team);
            } else {
                println!("'{}' is not in '{}'", agent, team);
            }
            Ok(())
        }
        TeamCommand::List => {
            let teams = coordinator.list_teams()?;
            render(format, &teams, || {
                if teams.is_empty() {
                    println!("No teams found.");
                    return;
                }
                println!("{:<20}  {:<8}  {:<7}  DESCRIPTION", "NAME", "COLOR", "MEMBERS");
                println!("{}", "-".repeat(70));
                for team in &teams {
                    println!(
                        "{:<20}  {:<8}  {:<7}  {}",
                        truncate(&team.name, 20),
                        team.color.map(|c| c.to_hex()).unwrap_or_else(|| "-".to_string()),
                        team.members.len(),
                        truncate(&team.description, 30)
                    );
                }
            })
        }
    }
}

async fn cmd_cascade(
    coordinator: &Coordinator,
    message: &CascadingMessage,
    caller: Option<&str>,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    if dry_run {
        let deliveries = coordinator.explain_cascade(message)?;
        return render(format, &deliveries, || {
            if deliveries.is_empty() {
                println!("No recipients.");
            }
            for delivery in &deliveries {
                println!(
                    "{:<20}  {:<18}  {}",
                    truncate(&delivery.agent, 20),
                    delivery.rule.to_string(),
                    delivery.content
                );
            }
        });
    }

    let result = coordinator.send_cascade(message, caller).await?;
    render(format, &result, || {
        for dispatch in &result.dispatches {
            println!(
                "{:<8}  {:<24}  {}",
                dispatch.dispatch.session,
                truncate(&dispatch.dispatch.agents.join(","), 24),
                describe_outcome(&dispatch.dispatch.outcome)
            );
        }
        let skipped = result.skipped_agents();
        if !skipped.is_empty() {
            println!("\nSkipped (locked): {}", skipped.join(", "));
        }
    })
}

fn cmd_lock(coordinator: &Coordinator, session: &str, agent: &str) -> Result<()> {
    if coordinator.lock_session(&SessionId::from(session), agent)? {
        println!("Locked {} for '{}'", session, agent);
    } else {
        println!("'{}' already holds {}", agent, session);
    }
    Ok(())
}

async fn cmd_playbook(coordinator: &Coordinator, file: &Path, format: OutputFormat) -> Result<()> {
    let playbook: Playbook = load_json(file)?;
    info!(playbook = %playbook.name, stages = playbook.commands.len(), "Running playbook");

    let report = coordinator.run_playbook(&playbook).await?;
    render(format, &report, || print_report(&report))?;

    if report.succeeded() {
        Ok(())
    } else {
        Err(CliError::Usage(format!(
            "playbook '{}' finished with {} failure(s)",
            report.name,
            report.failure_count()
        )))
    }
}

fn print_report(report: &PlaybookReport) {
    println!("Playbook '{}'", report.name);
    for stage in &report.stages {
        let mode = if stage.parallel { "parallel" } else { "sequential" };
        println!("\n[{}] ({})", stage.name, mode);
        for message in &stage.messages {
            println!("  {}", truncate(&message.content, 60));
            if let Some(error) = &message.error {
                println!("    error: {}", error);
            }
            for dispatch in &message.dispatches {
                println!(
                    "    {:<8} {:<24} {}",
                    dispatch.session,
                    truncate(&dispatch.agents.join(","), 24),
                    describe_outcome(&dispatch.outcome)
                );
            }
        }
        if stage.skipped > 0 {
            println!("  ({} message(s) not run)", stage.skipped);
        }
    }

    if let Some(stage) = &report.halted_at {
        println!("\nHalted at stage '{}'", stage);
    }
    if let Some(cascade) = &report.cascade {
        println!("\nCascade: {} delivery(ies)", cascade.plan.delivery_count());
        let skipped = cascade.skipped_agents();
        if !skipped.is_empty() {
            println!("  skipped (locked): {}", skipped.join(", "));
        }
    }
    for (agent, outcome) in &report.read_results {
        println!("\n--- {} ---", agent);
        match outcome.text() {
            Some(text) => println!("{}", text),
            None => println!("{}", describe_read(outcome)),
        }
    }
    println!("\n{} failure(s)", report.failure_count());
}

fn cmd_color(coordinator: &Coordinator, count: usize, format: OutputFormat) -> Result<()> {
    let colors = (0..count)
        .map(|_| coordinator.next_team_color())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    render(format, &colors, || {
        for color in &colors {
            println!(
                "{}  hsl({:.1}, {:.0}%, {:.0}%)",
                color.to_hex(),
                color.hue,
                color.saturation,
                color.lightness
            );
        }
    })
}

fn describe_outcome(outcome: &DeliveryOutcome) -> String {
    match outcome {
        DeliveryOutcome::Delivered => "delivered".to_string(),
        DeliveryOutcome::Failed { error } => format!("failed: {}", error),
        DeliveryOutcome::Skipped { reason } => format!("skipped: {}", reason),
        DeliveryOutcome::TimedOut => "timed out".to_string(),
    }
}

fn describe_read(outcome: &ReadOutcome) -> String {
    match outcome {
        ReadOutcome::Output { text } => text.clone(),
        ReadOutcome::Failed { error } => format!("(read failed: {})", error),
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Prints `value` as JSON, or runs `table` for the table format.
fn render<T: Serialize>(format: OutputFormat, value: &T, table: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Table => table(),
    }
    Ok(())
}

/// Truncates to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::TerminationContext;

    #[test]
    fn test_build_cascade_requires_a_part() {
        assert!(build_cascade(None, vec![], vec![]).is_err());

        let message = build_cascade(
            Some("all".into()),
            vec![("backend".into(), "deploy".into())],
            vec![("api".into(), "rollback".into())],
        )
        .unwrap();
        assert_eq!(message.broadcast.as_deref(), Some("all"));
        assert_eq!(message.team_messages["backend"], "deploy");
        assert_eq!(message.agent_messages["api"], "rollback");
    }

    #[test]
    fn test_condition_from_flags() {
        assert!(condition_from_flags(None, None, None, None).is_err());
        assert!(condition_from_flags(None, Some(0), None, None).is_err());

        let condition = condition_from_flags(Some("done".into()), Some(60), None, None).unwrap();
        let ctx = TerminationContext {
            last_output: "All DONE".to_string(),
            ..TerminationContext::default()
        };
        assert!(condition.is_met(&ctx));
        assert!(!condition.is_met(&TerminationContext::default()));
    }

    #[test]
    fn test_needs_sessions() {
        let dry = Commands::Cascade {
            broadcast: Some("x".into()),
            teams: vec![],
            agents: vec![],
            caller: None,
            dry_run: true,
        };
        assert!(!needs_sessions(&dry));
        assert!(needs_sessions(&Commands::Read {
            agent: "a".into(),
            lines: None
        }));
        assert!(!needs_sessions(&Commands::Color { count: 1 }));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-name", 8), "a-ver...");
    }

    #[tokio::test]
    async fn test_registry_commands_share_state_dir() {
        let dir = tempfile::tempdir().unwrap();

        execute(
            Commands::Team {
                action: TeamCommand::Create {
                    name: "backend".into(),
                    description: String::new(),
                },
            },
            dir.path(),
            OutputFormat::Json,
        )
        .await
        .unwrap();
        execute(
            Commands::Agent {
                action: AgentCommand::Register {
                    name: "api".into(),
                    session: "%7".into(),
                    teams: vec!["backend".into()],
                },
            },
            dir.path(),
            OutputFormat::Table,
        )
        .await
        .unwrap();
        execute(
            Commands::Lock {
                session: "%7".into(),
                agent: "api".into(),
            },
            dir.path(),
            OutputFormat::Table,
        )
        .await
        .unwrap();

        let coordinator = open_coordinator(dir.path(), false).unwrap();
        coordinator
            .register_agent("web", SessionId::from("%8"), &[])
            .unwrap();
        let agents = coordinator.list_agents(Some("backend")).unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(
            coordinator.locks().owner(&SessionId::from("%7")).unwrap().as_deref(),
            Some("api")
        );

        let err = execute(
            Commands::Lock {
                session: "%7".into(),
                agent: "web".into(),
            },
            dir.path(),
            OutputFormat::Table,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("is locked by api"));
    }

    #[tokio::test]
    async fn test_dry_run_cascade_needs_no_tmux() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = open_coordinator(dir.path(), false).unwrap();
        coordinator
            .register_agent("api", SessionId::from("%1"), &[])
            .unwrap();
        drop(coordinator);

        execute(
            Commands::Cascade {
                broadcast: Some("hello".into()),
                teams: vec![],
                agents: vec![],
                caller: None,
                dry_run: true,
            },
            dir.path(),
            OutputFormat::Json,
        )
        .await
        .unwrap();
    }
}
