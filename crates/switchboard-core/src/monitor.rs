//! Output monitor for registered sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use switchboard_models::SessionId;
use switchboard_provider::SessionProvider;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::CoordinatorConfig;
use crate::registry::Registry;

/// Output captured from one agent's session after it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEvent {
    pub agent: String,
    pub session: SessionId,
    pub output: String,
    pub captured_at: DateTime<Utc>,
}

/// Polls every registered agent's session and queues changed output.
///
/// Events go to a bounded channel; a slow consumer slows polling down
/// instead of growing memory. The loop ends on shutdown or when the
/// receiver is dropped.
pub struct OutputMonitor {
    registry: Arc<Registry>,
    provider: Arc<dyn SessionProvider>,
    poll_interval: Duration,
    max_lines: usize,
    last_seen: HashMap<String, String>,
    events: mpsc::Sender<OutputEvent>,
    shutdown: watch::Receiver<bool>,
}

impl OutputMonitor {
    /// Creates a monitor and the receiving end of its event queue.
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn SessionProvider>,
        config: &CoordinatorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, mpsc::Receiver<OutputEvent>) {
        let (events, receiver) = mpsc::channel(config.output_queue_capacity.max(1));
        let monitor = Self {
            registry,
            provider,
            poll_interval: config.poll_interval,
            max_lines: config.read_max_lines,
            last_seen: HashMap::new(),
            events,
            shutdown,
        };
        (monitor, receiver)
    }

    /// Runs the polling loop until shutdown.
    pub async fn run(&mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting output monitor"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                    if self.events.is_closed() {
                        debug!("Output receiver dropped");
                        break;
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("Output monitor received shutdown signal");
                        break;
                    }
                }
            }
        }

        debug!("Output monitor stopped");
    }

    /// Polls every agent once and returns how many events were queued.
    ///
    /// Agents sharing a session share one read.
    pub async fn poll_once(&mut self) -> usize {
        let agents = match self.registry.list_agents(None) {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "Could not list agents to monitor");
                return 0;
            }
        };

        self.last_seen
            .retain(|name, _| agents.iter().any(|a| &a.name == name));

        let mut captured: HashMap<SessionId, Option<String>> = HashMap::new();
        let mut queued = 0;

        for agent in agents {
            if !captured.contains_key(&agent.session_id) {
                let output = match self.provider.read(&agent.session_id, self.max_lines).await {
                    Ok(output) => Some(output),
                    Err(e) => {
                        warn!(agent = %agent.name, session = %agent.session_id, error = %e, "Failed to capture output");
                        None
                    }
                };
                captured.insert(agent.session_id.clone(), output);
            }
            let Some(Some(output)) = captured.get(&agent.session_id) else {
                continue;
            };

            if self.last_seen.get(&agent.name) == Some(output) {
                continue;
            }
            trace!(agent = %agent.name, bytes = output.len(), "Output changed");
            self.last_seen.insert(agent.name.clone(), output.clone());

            let event = OutputEvent {
                agent: agent.name,
                session: agent.session_id,
                output: output.clone(),
                captured_at: Utc::now(),
            };
            if self.events.send(event).await.is_err() {
                break;
            }
            queued += 1;
        }

        queued
    }
}
