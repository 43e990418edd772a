//! Barriers: wait until every listed agent reports ready.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_models::BarrierId;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    Waiting,
    Released,
    TimedOut,
    Cancelled,
}

/// A one-shot rendezvous for a fixed set of agents.
#[derive(Debug)]
pub struct Barrier {
    id: BarrierId,
    name: String,
    agents: BTreeSet<String>,
    ready: Mutex<BTreeSet<String>>,
    state: watch::Sender<BarrierState>,
    created_at: DateTime<Utc>,
}

impl Barrier {
    /// Creates a barrier over `agents`.
    ///
    /// # Errors
    ///
    /// `Validation` if the name is blank or no agents are given.
    pub fn new<I, S>(name: impl Into<String>, agents: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::validation("barrier name must not be empty"));
        }
        let agents: BTreeSet<String> = agents.into_iter().map(Into::into).collect();
        if agents.is_empty() {
            return Err(CoreError::validation(format!("barrier '{}' has no agents", name)));
        }

        let (state, _) = watch::channel(BarrierState::Waiting);
        Ok(Self {
            id: BarrierId::new(),
            name,
            agents,
            ready: Mutex::new(BTreeSet::new()),
            state,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &BarrierId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agents(&self) -> &BTreeSet<String> {
        &self.agents
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> BarrierState {
        *self.state.borrow()
    }

    fn ready_set(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<String>>> {
        self.ready
            .lock()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    /// Marks `agent` ready and releases the barrier once everyone is.
    ///
    /// Returns `false` for an agent not in the barrier or when the barrier is
    /// no longer waiting.
    pub fn mark_ready(&self, agent: &str) -> Result<bool> {
        if !self.agents.contains(agent) || self.state() != BarrierState::Waiting {
            return Ok(false);
        }

        let mut ready = self.ready_set()?;
        ready.insert(agent.to_string());
        debug!(barrier = %self.name, agent = %agent, ready = ready.len(), total = self.agents.len(), "Agent ready");

        if ready.len() == self.agents.len() {
            let released = self.state.send_if_modified(|state| {
                if *state == BarrierState::Waiting {
                    *state = BarrierState::Released;
                    true
                } else {
                    false
                }
            });
            if released {
                info!(barrier = %self.name, "Barrier released");
            }
        }
        Ok(true)
    }

    /// Waits up to `timeout` for the barrier to leave the waiting state.
    ///
    /// A timeout moves the barrier to `TimedOut` for every waiter.
    pub async fn wait(&self, timeout: Duration) -> BarrierState {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(timeout, rx.wait_for(|s| *s != BarrierState::Waiting))
            .await
            .is_ok();

        if !settled {
            self.state.send_if_modified(|state| {
                if *state == BarrierState::Waiting {
                    *state = BarrierState::TimedOut;
                    true
                } else {
                    false
                }
            });
            debug!(barrier = %self.name, "Barrier wait timed out");
        }
        self.state()
    }

    /// Cancels the barrier, waking all waiters. No effect once settled.
    pub fn cancel(&self) {
        self.state.send_if_modified(|state| {
            if *state == BarrierState::Waiting {
                *state = BarrierState::Cancelled;
                true
            } else {
                false
            }
        });
    }

    /// Agents that have not reported ready, sorted.
    pub fn waiting_for(&self) -> Result<Vec<String>> {
        let ready = self.ready_set()?;
        Ok(self.agents.difference(&ready).cloned().collect())
    }

    /// Fraction of agents ready, from 0.0 to 1.0.
    pub fn progress(&self) -> Result<f64> {
        Ok(self.ready_set()?.len() as f64 / self.agents.len() as f64)
    }
}

/// Keeps barriers by id.
#[derive(Debug, Default)]
pub struct BarrierManager {
    barriers: RwLock<HashMap<BarrierId, Arc<Barrier>>>,
}

impl BarrierManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<I, S>(&self, name: &str, agents: I) -> Result<Arc<Barrier>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let barrier = Arc::new(Barrier::new(name, agents)?);
        self.barriers
            .write()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))?
            .insert(barrier.id().clone(), Arc::clone(&barrier));
        debug!(barrier = %name, id = %barrier.id(), "Barrier created");
        Ok(barrier)
    }

    pub fn get(&self, id: &BarrierId) -> Result<Option<Arc<Barrier>>> {
        Ok(self
            .barriers
            .read()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))?
            .get(id)
            .cloned())
    }

    /// Returns the most recently created barrier called `name`.
    pub fn get_by_name(&self, name: &str) -> Result<Option<Arc<Barrier>>> {
        Ok(self
            .barriers
            .read()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))?
            .values()
            .filter(|b| b.name() == name)
            .max_by_key(|b| b.created_at())
            .cloned())
    }

    /// Drops a barrier, cancelling it first.
    pub fn remove(&self, id: &BarrierId) -> Result<bool> {
        let removed = self
            .barriers
            .write()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))?
            .remove(id);
        if let Some(barrier) = &removed {
            barrier.cancel();
        }
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_releases_when_all_ready() {
        let barrier = Arc::new(Barrier::new("deploy", ["a", "b"]).unwrap());

        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.wait(Duration::from_secs(5)).await })
        };

        assert!(barrier.mark_ready("a").unwrap());
        assert_eq!(barrier.state(), BarrierState::Waiting);
        assert_eq!(barrier.waiting_for().unwrap(), vec!["b".to_string()]);
        assert_eq!(barrier.progress().unwrap(), 0.5);

        assert!(barrier.mark_ready("b").unwrap());
        assert_eq!(waiter.await.unwrap(), BarrierState::Released);
        assert_eq!(barrier.progress().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_mark_ready_rejections() {
        let barrier = Barrier::new("b", ["a"]).unwrap();
        assert!(!barrier.mark_ready("stranger").unwrap());

        barrier.cancel();
        assert!(!barrier.mark_ready("a").unwrap());
        assert_eq!(barrier.state(), BarrierState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let barrier = Barrier::new("b", ["a", "b"]).unwrap();
        barrier.mark_ready("a").unwrap();

        assert_eq!(barrier.wait(Duration::from_secs(30)).await, BarrierState::TimedOut);
        assert!(!barrier.mark_ready("b").unwrap());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let barrier = Arc::new(Barrier::new("b", ["a"]).unwrap());
        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.wait(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        barrier.cancel();
        assert_eq!(waiter.await.unwrap(), BarrierState::Cancelled);
    }

    #[test]
    fn test_invalid_barriers() {
        assert!(Barrier::new("", ["a"]).is_err());
        assert!(Barrier::new("empty", Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_manager_lookup() {
        let manager = BarrierManager::new();
        let barrier = manager.create("sync", ["a", "b"]).unwrap();

        assert!(manager.get(barrier.id()).unwrap().is_some());
        assert_eq!(
            manager.get_by_name("sync").unwrap().unwrap().id(),
            barrier.id()
        );
        assert!(manager.get_by_name("other").unwrap().is_none());

        assert!(manager.remove(barrier.id()).unwrap());
        assert_eq!(barrier.state(), BarrierState::Cancelled);
        assert!(manager.get(barrier.id()).unwrap().is_none());
    }
}
