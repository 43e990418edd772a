//! Playbook execution.
//!
//! Stages run strictly in order. A parallel stage dispatches all of its
//! messages at once and joins them; a sequential stage stops at the first
//! failed message, and that failure also halts the rest of the playbook.
//! After the stages, the optional cascade is resolved and fanned out, then
//! output is read back from the requested sessions.
//!
//! Individual delivery failures never turn into errors. They are reported
//! per message and per session in the [`PlaybookReport`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use switchboard_models::{
    Agent, CascadePlan, Playbook, PlaybookCommand, PlaybookMessage, SessionId, SessionTarget,
};
use switchboard_provider::SessionProvider;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cascade::CascadeResolver;
use crate::config::CoordinatorConfig;
use crate::error::{CoreError, Result};
use crate::locks::LockManager;
use crate::redaction::SecretRedactor;
use crate::registry::Registry;

/// Outcome of one send into one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { error: String },
    /// Not attempted, for example because another agent holds the lock.
    Skipped { reason: String },
    /// The stage deadline passed before the send completed.
    TimedOut,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    /// Failed and timed-out sends count as failures; skips do not.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Failed { .. } | DeliveryOutcome::TimedOut
        )
    }
}

/// One send to a session and the agents bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub session: SessionId,
    pub agents: Vec<String>,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Result of one playbook message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageResult {
    pub content: String,
    pub dispatches: Vec<Dispatch>,
    /// Set when the message could not be dispatched at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResult {
    /// True when every session received the message.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.dispatches.iter().all(|d| d.outcome.is_delivered())
    }

    fn failure_count(&self) -> usize {
        usize::from(self.error.is_some())
            + self
                .dispatches
                .iter()
                .filter(|d| !d.outcome.is_delivered())
                .count()
    }
}

/// Result of one command stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub name: String,
    pub parallel: bool,
    /// Results for every message that was attempted.
    pub messages: Vec<MessageResult>,
    /// Messages never attempted because an earlier one failed.
    pub skipped: usize,
    pub timed_out: bool,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.skipped == 0 && self.messages.iter().all(MessageResult::succeeded)
    }
}

/// One cascade send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeDispatch {
    pub content: String,
    #[serde(flatten)]
    pub dispatch: Dispatch,
}

/// The resolved cascade and what happened to each send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeResult {
    pub plan: CascadePlan,
    pub dispatches: Vec<CascadeDispatch>,
}

impl CascadeResult {
    /// Agents skipped because their session was locked by someone else.
    pub fn skipped_agents(&self) -> Vec<&str> {
        self.dispatches
            .iter()
            .filter(|d| matches!(d.dispatch.outcome, DeliveryOutcome::Skipped { .. }))
            .flat_map(|d| d.dispatch.agents.iter().map(String::as_str))
            .collect()
    }
}

/// Output read back from one agent's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadOutcome {
    Output { text: String },
    Failed { error: String },
}

impl ReadOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            ReadOutcome::Output { text } => Some(text),
            ReadOutcome::Failed { .. } => None,
        }
    }
}

/// Everything that happened during one playbook run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybookReport {
    pub name: String,
    pub stages: Vec<StageResult>,
    /// Stage whose failure stopped the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeResult>,
    /// Read-back output keyed by agent name.
    pub read_results: BTreeMap<String, ReadOutcome>,
}

impl PlaybookReport {
    /// Failed, timed-out or undeliverable sends across stages and cascade.
    pub fn failure_count(&self) -> usize {
        let stage_failures: usize = self
            .stages
            .iter()
            .flat_map(|s| &s.messages)
            .map(MessageResult::failure_count)
            .sum();
        let cascade_failures = self.cascade.as_ref().map_or(0, |c| {
            c.dispatches
                .iter()
                .filter(|d| d.dispatch.outcome.is_failure())
                .count()
        });
        stage_failures + cascade_failures
    }

    pub fn succeeded(&self) -> bool {
        self.halted_at.is_none() && self.failure_count() == 0
    }
}

/// Runs playbooks against a registry, lock manager and session provider.
pub struct PlaybookExecutor {
    registry: Arc<Registry>,
    locks: Arc<LockManager>,
    provider: Arc<dyn SessionProvider>,
    resolver: CascadeResolver,
    redactor: Option<SecretRedactor>,
    stage_timeout: Option<Duration>,
    read_max_lines: usize,
}

impl PlaybookExecutor {
    pub fn new(
        registry: Arc<Registry>,
        locks: Arc<LockManager>,
        provider: Arc<dyn SessionProvider>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            locks,
            provider,
            resolver: CascadeResolver::new(),
            redactor: config.redact_output.then(SecretRedactor::new),
            stage_timeout: config.stage_timeout,
            read_max_lines: config.read_max_lines,
        }
    }

    /// Checks the playbook shape and every reference before anything is sent.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty playbook, unnamed or empty command, zero
    /// timeout or malformed target. `NotFound` for an unknown team, cascade
    /// key or invoking agent.
    pub fn validate(&self, playbook: &Playbook) -> Result<()> {
        if playbook.is_empty() {
            return Err(CoreError::validation("playbook has no commands, cascade or read targets"));
        }
        if let Some(agent) = &playbook.invoked_by {
            if !self.registry.contains_agent(agent)? {
                return Err(CoreError::not_found("agent", agent.as_str()));
            }
        }
        if playbook.read_lines == Some(0) {
            return Err(CoreError::validation("read_lines must be positive"));
        }

        for (index, command) in playbook.commands.iter().enumerate() {
            if command.name.trim().is_empty() {
                return Err(CoreError::validation(format!("command #{} has no name", index + 1)));
            }
            if command.messages.is_empty() {
                return Err(CoreError::validation(format!(
                    "command '{}' has no messages",
                    command.name
                )));
            }
            if command.timeout_ms == Some(0) {
                return Err(CoreError::validation(format!(
                    "command '{}' has a zero timeout",
                    command.name
                )));
            }
            for message in &command.messages {
                self.registry.check_target(&message.targets)?;
            }
        }

        if let Some(cascade) = &playbook.cascade {
            self.resolver.validate(cascade, &self.registry.snapshot()?)?;
        }
        for target in &playbook.read_targets {
            self.registry.check_target(target)?;
        }
        Ok(())
    }

    /// Validates and runs a playbook.
    #[instrument(skip(self, playbook), fields(playbook = %playbook.name))]
    pub async fn run(&self, playbook: &Playbook) -> Result<PlaybookReport> {
        self.validate(playbook)?;
        let caller = playbook.invoked_by.as_deref();

        let mut stages = Vec::with_capacity(playbook.commands.len());
        let mut halted_at = None;
        for command in &playbook.commands {
            let stage = self.run_stage(command, caller).await;
            let halt = !command.parallel && !stage.succeeded();
            stages.push(stage);
            if halt {
                warn!(stage = %command.name, "Sequential stage failed, halting playbook");
                halted_at = Some(command.name.clone());
                break;
            }
        }

        let cascade = match (&playbook.cascade, &halted_at) {
            (Some(message), None) => {
                let plan = self.resolver.resolve(message, &self.registry.snapshot()?)?;
                Some(self.dispatch_cascade(plan, caller).await?)
            }
            _ => None,
        };

        let lines = playbook.read_lines.unwrap_or(self.read_max_lines);
        let read_results = self.read_back(&playbook.read_targets, lines).await?;

        let report = PlaybookReport {
            name: playbook.name.clone(),
            stages,
            halted_at,
            cascade,
            read_results,
        };
        info!(
            stages = report.stages.len(),
            failures = report.failure_count(),
            halted = report.halted_at.is_some(),
            "Playbook finished"
        );
        Ok(report)
    }

    fn deadline_for(&self, command: &PlaybookCommand) -> Option<Instant> {
        command
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.stage_timeout)
            .map(|timeout| Instant::now() + timeout)
    }

    async fn run_stage(&self, command: &PlaybookCommand, caller: Option<&str>) -> StageResult {
        let deadline = self.deadline_for(command);
        debug!(
            stage = %command.name,
            parallel = command.parallel,
            messages = command.messages.len(),
            "Running stage"
        );

        let mut messages = Vec::with_capacity(command.messages.len());
        let mut skipped = 0;
        if command.parallel {
            messages = join_all(
                command
                    .messages
                    .iter()
                    .map(|message| self.run_message(message, caller, deadline)),
            )
            .await;
        } else {
            for (index, message) in command.messages.iter().enumerate() {
                let result = self.run_message(message, caller, deadline).await;
                let failed = !result.succeeded();
                messages.push(result);
                if failed {
                    skipped = command.messages.len() - index - 1;
                    break;
                }
            }
        }

        let timed_out = messages
            .iter()
            .flat_map(|m| &m.dispatches)
            .any(|d| d.outcome == DeliveryOutcome::TimedOut);
        StageResult {
            name: command.name.clone(),
            parallel: command.parallel,
            messages,
            skipped,
            timed_out,
        }
    }

    async fn run_message(
        &self,
        message: &PlaybookMessage,
        caller: Option<&str>,
        deadline: Option<Instant>,
    ) -> MessageResult {
        let failed = |error: String| MessageResult {
            content: message.content.clone(),
            dispatches: Vec::new(),
            error: Some(error),
        };

        let agents = match self.registry.resolve_target(&message.targets) {
            Ok(agents) => agents,
            Err(e) => return failed(e.to_string()),
        };
        if agents.is_empty() {
            warn!(targets = %message.targets, "No sessions matched");
            return failed(format!("no sessions matched {}", message.targets));
        }

        let dispatches = join_all(group_by_session(agents).into_iter().map(|(session, agents)| {
            self.dispatch(session, agents, &message.content, message.execute, caller, deadline, false)
        }))
        .await;

        MessageResult {
            content: message.content.clone(),
            dispatches,
            error: None,
        }
    }

    /// Sends `text` to one session after checking its lock.
    ///
    /// A lock held by someone other than `caller` fails the dispatch, or
    /// skips it when `skip_locked` is set.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        session: SessionId,
        agents: Vec<String>,
        text: &str,
        execute: bool,
        caller: Option<&str>,
        deadline: Option<Instant>,
        skip_locked: bool,
    ) -> Dispatch {
        let outcome = match self.locks.check_write(&session, caller) {
            Err(CoreError::LockConflict { owner, .. }) if skip_locked => {
                warn!(session = %session, owner = %owner, "Skipping locked session");
                DeliveryOutcome::Skipped {
                    reason: format!("locked by {}", owner),
                }
            }
            Err(e) => {
                warn!(session = %session, error = %e, "Write rejected");
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Ok(()) => self.send(&session, text, execute, deadline).await,
        };

        Dispatch {
            session,
            agents,
            outcome,
        }
    }

    async fn send(
        &self,
        session: &SessionId,
        text: &str,
        execute: bool,
        deadline: Option<Instant>,
    ) -> DeliveryOutcome {
        let send = self.provider.send(session, text, execute);
        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, send).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(session = %session, "Send timed out");
                    return DeliveryOutcome::TimedOut;
                }
            },
            None => send.await,
        };

        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(session = %session, error = %e, "Send failed");
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Sends every content in `plan` to its recipients concurrently.
    pub async fn dispatch_cascade(
        &self,
        plan: CascadePlan,
        caller: Option<&str>,
    ) -> Result<CascadeResult> {
        let snapshot = self.registry.snapshot()?;
        let deadline = self.stage_timeout.map(|timeout| Instant::now() + timeout);

        let mut sends = Vec::new();
        for (content, recipients) in &plan.deliveries {
            let agents: Vec<Agent> = recipients
                .iter()
                .filter_map(|name| snapshot.agent(name).cloned())
                .collect();
            for (session, agents) in group_by_session(agents) {
                sends.push((content.as_str(), session, agents));
            }
        }

        let dispatches = join_all(sends.into_iter().map(|(content, session, agents)| async move {
            CascadeDispatch {
                content: content.to_string(),
                dispatch: self
                    .dispatch(session, agents, content, true, caller, deadline, true)
                    .await,
            }
        }))
        .await;

        debug!(sends = dispatches.len(), "Cascade dispatched");
        Ok(CascadeResult { plan, dispatches })
    }

    /// Reads output from every session matched by `targets`.
    ///
    /// Each session is read once; agents sharing it get the same output.
    pub async fn read_back(
        &self,
        targets: &[SessionTarget],
        max_lines: usize,
    ) -> Result<BTreeMap<String, ReadOutcome>> {
        let mut seen = HashSet::new();
        let mut agents = Vec::new();
        for target in targets {
            for agent in self.registry.resolve_target(target)? {
                if seen.insert(agent.name.clone()) {
                    agents.push(agent);
                }
            }
        }

        let reads = join_all(group_by_session(agents).into_iter().map(|(session, agents)| async move {
            let outcome = match self.provider.read(&session, max_lines).await {
                Ok(text) => ReadOutcome::Output {
                    text: match &self.redactor {
                        Some(redactor) => redactor.redact(&text),
                        None => text,
                    },
                },
                Err(e) => {
                    warn!(session = %session, error = %e, "Read failed");
                    ReadOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            (agents, outcome)
        }))
        .await;

        Ok(reads
            .into_iter()
            .flat_map(|(agents, outcome)| {
                agents.into_iter().map(move |agent| (agent, outcome.clone()))
            })
            .collect())
    }
}

/// Groups agents by session, keeping first-seen order.
fn group_by_session(agents: Vec<Agent>) -> Vec<(SessionId, Vec<String>)> {
    let mut groups: Vec<(SessionId, Vec<String>)> = Vec::new();
    for agent in agents {
        match groups.iter_mut().find(|(session, _)| *session == agent.session_id) {
            Some((_, names)) => names.push(agent.name),
            None => groups.push((agent.session_id, vec![agent.name])),
        }
    }
    groups
}
