//! The coordinator facade.
//!
//! [`Coordinator`] wires the registry, lock manager, cascade resolver,
//! playbook executor and color distributor to one session provider, keeps
//! an optional [`RegistryStore`] in sync after every mutation and broadcasts
//! a [`CoordinatorEvent`] for each state change.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use switchboard_models::{
    AccessRequest, Agent, BarrierId, CascadePlan, CascadingMessage, Delivery, Handoff, HandoffId,
    HierarchyPath, Playbook, SessionId, SessionTarget, Team, TeamColor, VoteId,
};
use switchboard_persistence::{HandoffLog, RegistryStore};
use switchboard_provider::SessionProvider;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cascade::CascadeResolver;
use crate::color::ColorDistributor;
use crate::config::CoordinatorConfig;
use crate::coordination::{Barrier, BarrierManager, LeaderElection, VoteTally, VotingRound};
use crate::error::{CoreError, Result};
use crate::event::CoordinatorEvent;
use crate::executor::{CascadeResult, PlaybookExecutor, PlaybookReport};
use crate::handoff::HandoffManager;
use crate::locks::LockManager;
use crate::monitor::{OutputEvent, OutputMonitor};
use crate::redaction::SecretRedactor;
use crate::registry::Registry;
use crate::termination::{TerminationCondition, TerminationContext};

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a watched session met its termination condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub agent: String,
    pub condition: String,
    pub elapsed_ms: u64,
    /// Output changes observed after the first capture.
    pub message_count: usize,
    pub last_output: String,
}

/// Entry point for every coordination operation.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<Registry>,
    locks: Arc<LockManager>,
    handoffs: HandoffManager,
    provider: Arc<dyn SessionProvider>,
    executor: PlaybookExecutor,
    resolver: CascadeResolver,
    colors: Mutex<ColorDistributor>,
    barriers: BarrierManager,
    votes: Mutex<HashMap<VoteId, VotingRound>>,
    redactor: Option<SecretRedactor>,
    store: Option<RegistryStore>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl Coordinator {
    /// Creates a coordinator with in-memory state only.
    pub fn new(provider: Arc<dyn SessionProvider>, config: CoordinatorConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let locks = Arc::new(LockManager::new(Arc::clone(&registry)));
        let handoffs = HandoffManager::new(Arc::clone(&registry));
        Self::assemble(provider, config, registry, locks, handoffs, None)
    }

    /// Opens a coordinator whose state lives under `state_dir`.
    ///
    /// Agents, teams, locks and handoff history are loaded, and the color
    /// distributor is seeded with the hues of existing teams.
    pub fn open(
        state_dir: impl AsRef<Path>,
        provider: Arc<dyn SessionProvider>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        let store = RegistryStore::new(state_dir);

        let registry = Arc::new(Registry::from_records(
            store.load_agents()?,
            store.load_teams()?,
        ));
        let locks = Arc::new(LockManager::from_table(
            Arc::clone(&registry),
            store.load_locks()?,
        )?);
        let handoffs = HandoffManager::with_log(Arc::clone(&registry), HandoffLog::new(state_dir))?;

        info!(state_dir = %state_dir.display(), "Coordinator state loaded");
        Ok(Self::assemble(
            provider,
            config,
            registry,
            locks,
            handoffs,
            Some(store),
        ))
    }

    fn assemble(
        provider: Arc<dyn SessionProvider>,
        config: CoordinatorConfig,
        registry: Arc<Registry>,
        locks: Arc<LockManager>,
        handoffs: HandoffManager,
        store: Option<RegistryStore>,
    ) -> Self {
        let hues: Vec<f64> = registry
            .list_teams()
            .unwrap_or_default()
            .iter()
            .filter_map(|team| team.color.map(|c| c.hue))
            .collect();
        let colors =
            ColorDistributor::with_hues(config.color_saturation, config.color_lightness, hues);

        let executor = PlaybookExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&locks),
            Arc::clone(&provider),
            &config,
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            redactor: config.redact_output.then(SecretRedactor::new),
            config,
            registry,
            locks,
            handoffs,
            provider,
            executor,
            resolver: CascadeResolver::new(),
            colors: Mutex::new(colors),
            barriers: BarrierManager::new(),
            votes: Mutex::new(HashMap::new()),
            store,
            events,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    /// Subscribes to state change events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CoordinatorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ==================== Persistence ====================

    fn save_agents<'a>(&self, agents: impl IntoIterator<Item = &'a str>) -> Result<()> {
        if let Some(store) = &self.store {
            for name in agents {
                store.save_agent(&self.registry.get_agent(name)?)?;
            }
        }
        Ok(())
    }

    fn save_teams<'a>(&self, teams: impl IntoIterator<Item = &'a str>) -> Result<()> {
        if let Some(store) = &self.store {
            for name in teams {
                store.save_team(&self.registry.get_team(name)?)?;
            }
        }
        Ok(())
    }

    /// An agent counts as known when registered here or saved by another
    /// process since this one loaded.
    fn agent_known(&self, store: &RegistryStore, name: &str) -> Result<bool> {
        if self.registry.contains_agent(name)? {
            return Ok(true);
        }
        Ok(matches!(store.load_agent(name), Ok(Some(_))))
    }

    /// Applies a lock mutation to the latest persisted lock table.
    ///
    /// With a store, the state directory stays locked while `locks.json` is
    /// reloaded, `mutate` runs and the result is saved. A failed mutation
    /// saves nothing.
    fn update_locks<T>(&self, mutate: impl FnOnce(&LockManager) -> Result<T>) -> Result<T> {
        let Some(store) = &self.store else {
            return mutate(&self.locks);
        };

        let _state = store.lock_state()?;
        self.locks
            .reload(store.load_locks()?, |name| self.agent_known(store, name))?;
        let output = mutate(&self.locks)?;
        store.save_locks(&self.locks.to_table()?)?;
        Ok(output)
    }

    /// Picks up locks taken by other processes before a write path checks them.
    fn refresh_locks(&self) -> Result<()> {
        if let Some(store) = &self.store {
            let _state = store.lock_state()?;
            self.locks
                .reload(store.load_locks()?, |name| self.agent_known(store, name))?;
        }
        Ok(())
    }

    // ==================== Agents and teams ====================

    /// Registers an agent on an existing session.
    pub fn register_agent(&self, name: &str, session: SessionId, teams: &[String]) -> Result<Agent> {
        let agent = self.registry.register_agent(name, session, teams)?;
        self.save_agents([name])?;
        self.save_teams(teams.iter().map(String::as_str))?;

        info!(agent = %name, session = %agent.session_id, "Agent registered");
        self.emit(CoordinatorEvent::AgentRegistered {
            agent: agent.name.clone(),
            session: agent.session_id.clone(),
        });
        Ok(agent)
    }

    /// Creates a new session through the provider and registers an agent on it.
    pub async fn spawn_agent(&self, name: &str, teams: &[String]) -> Result<Agent> {
        if self.registry.contains_agent(name)? {
            return Err(CoreError::already_exists("agent", name));
        }
        for team in teams {
            self.registry.get_team(team)?;
        }
        let session = self.provider.create_session(name).await?;
        debug!(agent = %name, session = %session, provider = self.provider.name(), "Session created");
        self.register_agent(name, session, teams)
    }

    /// Removes an agent, releasing its locks and team memberships.
    pub fn remove_agent(&self, name: &str) -> Result<Agent> {
        let agent = self.registry.remove_agent(name)?;
        let released = self.update_locks(|locks| locks.release_all(name))?;

        if let Some(store) = &self.store {
            store.delete_agent(name)?;
        }
        self.save_teams(agent.teams.iter().map(String::as_str))?;

        info!(agent = %name, released = released.len(), "Agent removed");
        for session in released {
            self.emit(CoordinatorEvent::SessionUnlocked { session });
        }
        self.emit(CoordinatorEvent::AgentRemoved {
            agent: name.to_string(),
        });
        Ok(agent)
    }

    pub fn get_agent(&self, name: &str) -> Result<Agent> {
        self.registry.get_agent(name)
    }

    pub fn list_agents(&self, team: Option<&str>) -> Result<Vec<Agent>> {
        self.registry.list_agents(team)
    }

    /// Creates a team and gives it the next color.
    pub fn create_team(&self, name: &str, description: &str) -> Result<Team> {
        self.registry.create_team(name, description)?;
        let color = self.next_team_color()?;
        let team = self.registry.set_team_color(name, color)?;
        self.save_teams([name])?;

        info!(team = %name, color = %color.to_hex(), "Team created");
        self.emit(CoordinatorEvent::TeamCreated {
            team: name.to_string(),
        });
        Ok(team)
    }

    /// Removes a team. Its former members stay registered.
    pub fn remove_team(&self, name: &str) -> Result<Team> {
        let team = self.registry.remove_team(name)?;
        if let Some(store) = &self.store {
            store.delete_team(name)?;
        }
        self.save_agents(team.members.iter().map(String::as_str))?;

        info!(team = %name, members = team.members.len(), "Team removed");
        self.emit(CoordinatorEvent::TeamRemoved {
            team: name.to_string(),
        });
        Ok(team)
    }

    pub fn list_teams(&self) -> Result<Vec<Team>> {
        self.registry.list_teams()
    }

    pub fn assign_agent_to_team(&self, agent: &str, team: &str) -> Result<bool> {
        let added = self.registry.assign_agent_to_team(agent, team)?;
        if added {
            self.save_agents([agent])?;
            self.save_teams([team])?;
            self.emit(CoordinatorEvent::MembershipChanged {
                agent: agent.to_string(),
                team: team.to_string(),
                joined: true,
            });
        }
        Ok(added)
    }

    pub fn remove_agent_from_team(&self, agent: &str, team: &str) -> Result<bool> {
        let removed = self.registry.remove_agent_from_team(agent, team)?;
        if removed {
            self.save_agents([agent])?;
            self.save_teams([team])?;
            self.emit(CoordinatorEvent::MembershipChanged {
                agent: agent.to_string(),
                team: team.to_string(),
                joined: false,
            });
        }
        Ok(removed)
    }

    pub fn resolve_target(&self, target: &SessionTarget) -> Result<Vec<Agent>> {
        self.registry.resolve_target(target)
    }

    pub fn resolve_hierarchy(&self, path: &HierarchyPath) -> Result<Agent> {
        self.registry.resolve_hierarchy(path)
    }

    /// Hands out the next team color.
    pub fn next_team_color(&self) -> Result<TeamColor> {
        Ok(self
            .colors
            .lock()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))?
            .next_color())
    }

    // ==================== Cascades ====================

    /// Resolves a cascade without sending anything.
    pub fn resolve_cascade(&self, message: &CascadingMessage) -> Result<CascadePlan> {
        self.resolver.resolve(message, &self.registry.snapshot()?)
    }

    /// Resolves a cascade and reports which rule picked each agent's message.
    pub fn explain_cascade(&self, message: &CascadingMessage) -> Result<Vec<Delivery>> {
        self.resolver.explain(message, &self.registry.snapshot()?)
    }

    /// Resolves and sends a cascade. Sessions locked by anyone other than
    /// `caller` are skipped.
    pub async fn send_cascade(
        &self,
        message: &CascadingMessage,
        caller: Option<&str>,
    ) -> Result<CascadeResult> {
        let plan = self.resolve_cascade(message)?;
        self.refresh_locks()?;
        self.executor.dispatch_cascade(plan, caller).await
    }

    // ==================== Direct I/O ====================

    /// Types `text` into an agent's session after checking its lock.
    pub async fn send_to_agent(
        &self,
        agent: &str,
        text: &str,
        execute: bool,
        caller: Option<&str>,
    ) -> Result<()> {
        let agent = self.registry.get_agent(agent)?;
        self.refresh_locks()?;
        self.locks.check_write(&agent.session_id, caller)?;
        self.provider.send(&agent.session_id, text, execute).await?;
        Ok(())
    }

    /// Reads recent output from an agent's session, redacted when enabled.
    pub async fn read_agent(&self, agent: &str, max_lines: Option<usize>) -> Result<String> {
        let agent = self.registry.get_agent(agent)?;
        let lines = max_lines.unwrap_or(self.config.read_max_lines);
        let output = self.provider.read(&agent.session_id, lines).await?;
        Ok(match &self.redactor {
            Some(redactor) => redactor.redact(&output),
            None => output,
        })
    }

    // ==================== Locks ====================

    pub fn lock_session(&self, session: &SessionId, agent: &str) -> Result<bool> {
        let locked = self.update_locks(|locks| locks.acquire(session, agent))?;
        if locked {
            self.emit(CoordinatorEvent::SessionLocked {
                session: session.clone(),
                owner: agent.to_string(),
            });
        }
        Ok(locked)
    }

    pub fn unlock_session(&self, session: &SessionId, agent: &str) -> Result<bool> {
        let unlocked = self.update_locks(|locks| locks.release(session, agent))?;
        if unlocked {
            self.emit(CoordinatorEvent::SessionUnlocked {
                session: session.clone(),
            });
        }
        Ok(unlocked)
    }

    /// Asks the current owner of `session` for access.
    ///
    /// # Errors
    ///
    /// `Validation` if the session is not locked.
    pub fn request_access(&self, session: &SessionId, requester: &str) -> Result<AccessRequest> {
        let request = self.update_locks(|locks| {
            let owner = locks.owner(session)?.ok_or_else(|| {
                CoreError::validation(format!("session {} is not locked", session))
            })?;
            locks.request_access(session, requester, &owner)
        })?;
        let owner = request.owner.clone();
        self.emit(CoordinatorEvent::AccessRequested {
            session: session.clone(),
            requester: requester.to_string(),
            owner,
        });
        Ok(request)
    }

    pub fn pending_requests(&self, owner: &str) -> Result<Vec<AccessRequest>> {
        self.locks.pending_requests(owner)
    }

    /// Hands the lock on `session` from `owner` to `requester`.
    pub fn grant_access(&self, session: &SessionId, owner: &str, requester: &str) -> Result<()> {
        self.update_locks(|locks| locks.grant_access(session, owner, requester))?;
        self.emit(CoordinatorEvent::SessionLocked {
            session: session.clone(),
            owner: requester.to_string(),
        });
        Ok(())
    }

    // ==================== Playbooks ====================

    pub async fn run_playbook(&self, playbook: &Playbook) -> Result<PlaybookReport> {
        self.refresh_locks()?;
        let report = self.executor.run(playbook).await?;
        self.emit(CoordinatorEvent::PlaybookFinished {
            name: report.name.clone(),
            failures: report.failure_count(),
        });
        Ok(report)
    }

    // ==================== Handoffs ====================

    /// Records a handoff and types a notice into the target's session.
    ///
    /// The notice is checked against the target's lock with the source as
    /// caller before anything is recorded. A provider failure while typing
    /// the notice is logged; the handoff stays pending either way.
    pub async fn initiate_handoff(
        &self,
        source: &str,
        target: &str,
        context: &str,
        reason: &str,
    ) -> Result<Handoff> {
        let target_agent = self.registry.get_agent(target)?;
        self.refresh_locks()?;
        self.locks.check_write(&target_agent.session_id, Some(source))?;

        let handoff = self.handoffs.initiate(source, target, context, reason)?;
        if let Err(e) = self
            .provider
            .send(&target_agent.session_id, &handoff.notice(), true)
            .await
        {
            warn!(handoff = %handoff.id, target = %target, error = %e, "Failed to deliver handoff notice");
        }

        self.emit(CoordinatorEvent::HandoffInitiated {
            id: handoff.id.clone(),
            source: source.to_string(),
            target: target.to_string(),
        });
        Ok(handoff)
    }

    pub fn acknowledge_handoff(&self, id: &HandoffId, agent: &str) -> Result<bool> {
        self.handoffs.acknowledge(id, agent)
    }

    pub fn pending_handoffs(&self, agent: &str) -> Result<Vec<Handoff>> {
        self.handoffs.pending(agent)
    }

    pub fn handoff_history(&self, agent: Option<&str>, limit: usize) -> Result<Vec<Handoff>> {
        self.handoffs.history(agent, limit)
    }

    // ==================== Coordination ====================

    fn require_agents<'a>(&self, agents: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for agent in agents {
            if !self.registry.contains_agent(agent)? {
                return Err(CoreError::not_found("agent", agent));
            }
        }
        Ok(())
    }

    /// Creates a barrier over registered agents.
    pub fn create_barrier(&self, name: &str, agents: &[String]) -> Result<Arc<Barrier>> {
        self.require_agents(agents.iter().map(String::as_str))?;
        self.barriers.create(name, agents.iter().cloned())
    }

    pub fn barrier(&self, id: &BarrierId) -> Result<Arc<Barrier>> {
        self.barriers
            .get(id)?
            .ok_or_else(|| CoreError::not_found("barrier", id.as_str()))
    }

    pub fn barrier_by_name(&self, name: &str) -> Result<Arc<Barrier>> {
        self.barriers
            .get_by_name(name)?
            .ok_or_else(|| CoreError::not_found("barrier", name))
    }

    fn votes(&self) -> Result<MutexGuard<'_, HashMap<VoteId, VotingRound>>> {
        self.votes
            .lock()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    /// Opens a voting round among registered agents.
    pub fn start_vote(&self, question: &str, options: &[String], voters: &[String]) -> Result<VoteId> {
        self.require_agents(voters.iter().map(String::as_str))?;
        let round = VotingRound::new(question, options.iter().cloned(), voters.iter().cloned())?;
        let id = round.id.clone();
        self.votes()?.insert(id.clone(), round);
        debug!(vote = %id, question = %question, "Vote started");
        Ok(id)
    }

    pub fn cast_vote(&self, id: &VoteId, voter: &str, option: &str) -> Result<bool> {
        let mut votes = self.votes()?;
        let round = votes
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("vote", id.as_str()))?;
        Ok(round.cast(voter, option))
    }

    pub fn vote_tally(&self, id: &VoteId) -> Result<VoteTally> {
        self.votes()?
            .get(id)
            .map(VotingRound::tally)
            .ok_or_else(|| CoreError::not_found("vote", id.as_str()))
    }

    /// Runs `election` against the current registry.
    pub fn elect_leader(&self, election: &mut LeaderElection) -> Result<Option<String>> {
        election.elect(&self.registry)
    }

    // ==================== Monitoring ====================

    /// Builds an output monitor over every registered agent.
    pub fn output_monitor(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> (OutputMonitor, mpsc::Receiver<OutputEvent>) {
        OutputMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.provider),
            &self.config,
            shutdown,
        )
    }

    /// Polls an agent's session until `condition` holds.
    ///
    /// The first capture is the baseline: it starts the idle clock but does
    /// not count as a message. Later changes increment the message count.
    pub async fn await_termination(
        &self,
        agent: &str,
        condition: &TerminationCondition,
    ) -> Result<TerminationReport> {
        let agent = self.registry.get_agent(agent)?;
        let started = Instant::now();
        let mut ctx = TerminationContext::default();
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(agent = %agent.name, condition = %condition.describe(), "Watching session");
        loop {
            ticker.tick().await;
            let output = self
                .provider
                .read(&agent.session_id, self.config.read_max_lines)
                .await?;

            if ctx.last_output_at.is_none() {
                ctx.last_output = output;
                ctx.last_output_at = Some(Instant::now());
            } else if output != ctx.last_output {
                ctx.message_count += 1;
                ctx.last_output = output;
                ctx.last_output_at = Some(Instant::now());
            }
            ctx.elapsed = started.elapsed();

            if condition.is_met(&ctx) {
                info!(agent = %agent.name, condition = %condition.describe(), "Termination condition met");
                return Ok(TerminationReport {
                    agent: agent.name,
                    condition: condition.describe(),
                    elapsed_ms: duration_ms(ctx.elapsed),
                    message_count: ctx.message_count,
                    last_output: ctx.last_output,
                });
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
