//! Work handoff between agents.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use switchboard_models::{Handoff, HandoffId};
use switchboard_persistence::HandoffLog;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::registry::Registry;

/// Tracks handoffs and mirrors every change to an optional log.
#[derive(Debug)]
pub struct HandoffManager {
    registry: Arc<Registry>,
    log: Option<HandoffLog>,
    handoffs: RwLock<Vec<Handoff>>,
}

impl HandoffManager {
    /// Creates an in-memory manager.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            log: None,
            handoffs: RwLock::new(Vec::new()),
        }
    }

    /// Creates a manager backed by `log`, replaying its history.
    pub fn with_log(registry: Arc<Registry>, log: HandoffLog) -> Result<Self> {
        let handoffs = log.load()?;
        debug!(count = handoffs.len(), path = %log.path().display(), "Loaded handoff history");
        Ok(Self {
            registry,
            log: Some(log),
            handoffs: RwLock::new(handoffs),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Handoff>>> {
        self.handoffs
            .read()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Handoff>>> {
        self.handoffs
            .write()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    fn persist(&self, handoff: &Handoff) -> Result<()> {
        if let Some(log) = &self.log {
            log.append(handoff)?;
        }
        Ok(())
    }

    /// Records a handoff from `source` to `target`.
    ///
    /// # Errors
    ///
    /// `NotFound` if either agent is unknown, `Validation` if they are the
    /// same agent.
    pub fn initiate(&self, source: &str, target: &str, context: &str, reason: &str) -> Result<Handoff> {
        for agent in [source, target] {
            if !self.registry.contains_agent(agent)? {
                return Err(CoreError::not_found("agent", agent));
            }
        }
        if source == target {
            return Err(CoreError::validation("an agent cannot hand off to itself"));
        }

        let handoff = Handoff::new(source, target, context, reason);
        self.persist(&handoff)?;
        self.write()?.push(handoff.clone());

        info!(handoff = %handoff.id, source = %source, target = %target, "Handoff initiated");
        Ok(handoff)
    }

    /// Acknowledges handoff `id` on behalf of `agent`.
    ///
    /// Returns `false` if no such handoff exists. Acknowledging twice is a
    /// no-op returning `true`.
    ///
    /// # Errors
    ///
    /// `Validation` if `agent` is not the handoff target.
    pub fn acknowledge(&self, id: &HandoffId, agent: &str) -> Result<bool> {
        let mut handoffs = self.write()?;
        let Some(handoff) = handoffs.iter_mut().find(|h| &h.id == id) else {
            return Ok(false);
        };
        if handoff.target != agent {
            return Err(CoreError::validation(format!(
                "handoff {} can only be acknowledged by {}",
                id, handoff.target
            )));
        }
        if handoff.acknowledged {
            return Ok(true);
        }

        let mut updated = handoff.clone();
        updated.acknowledge();
        self.persist(&updated)?;
        *handoff = updated;

        debug!(handoff = %id, agent = %agent, "Handoff acknowledged");
        Ok(true)
    }

    pub fn get(&self, id: &HandoffId) -> Result<Option<Handoff>> {
        Ok(self.read()?.iter().find(|h| &h.id == id).cloned())
    }

    /// Unacknowledged handoffs addressed to `agent`, oldest first.
    pub fn pending(&self, agent: &str) -> Result<Vec<Handoff>> {
        Ok(self
            .read()?
            .iter()
            .filter(|h| h.target == agent && !h.acknowledged)
            .cloned()
            .collect())
    }

    /// Up to `limit` handoffs, most recent first, optionally only those
    /// involving `agent`.
    pub fn history(&self, agent: Option<&str>, limit: usize) -> Result<Vec<Handoff>> {
        Ok(self
            .read()?
            .iter()
            .rev()
            .filter(|h| agent.map_or(true, |a| h.involves(a)))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        for (name, session) in [("alice", "%1"), ("bob", "%2"), ("carol", "%3")] {
            registry.register_agent(name, session.into(), &[]).unwrap();
        }
        registry
    }

    #[test]
    fn test_initiate_and_acknowledge() {
        let manager = HandoffManager::new(registry());
        let handoff = manager
            .initiate("alice", "bob", "migrations half done", "end of shift")
            .unwrap();

        assert_eq!(manager.pending("bob").unwrap().len(), 1);
        assert!(manager.pending("alice").unwrap().is_empty());

        assert!(manager.acknowledge(&handoff.id, "bob").unwrap());
        assert!(manager.pending("bob").unwrap().is_empty());
        let stored = manager.get(&handoff.id).unwrap().unwrap();
        assert!(stored.acknowledged);
        assert!(stored.acknowledged_at.is_some());
    }

    #[test]
    fn test_only_target_acknowledges() {
        let manager = HandoffManager::new(registry());
        let handoff = manager.initiate("alice", "bob", "", "").unwrap();
        assert!(matches!(
            manager.acknowledge(&handoff.id, "carol"),
            Err(CoreError::Validation(_))
        ));
        assert!(!manager.acknowledge(&HandoffId::from("missing"), "bob").unwrap());
    }

    #[test]
    fn test_unknown_agents_rejected() {
        let manager = HandoffManager::new(registry());
        assert!(matches!(
            manager.initiate("alice", "nobody", "", ""),
            Err(CoreError::NotFound { kind: "agent", .. })
        ));
        assert!(matches!(
            manager.initiate("alice", "alice", "", ""),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_history_most_recent_first() {
        let manager = HandoffManager::new(registry());
        manager.initiate("alice", "bob", "1", "").unwrap();
        manager.initiate("bob", "carol", "2", "").unwrap();
        manager.initiate("carol", "alice", "3", "").unwrap();

        let all = manager.history(None, 10).unwrap();
        let contexts: Vec<&str> = all.iter().map(|h| h.context.as_str()).collect();
        assert_eq!(contexts, vec!["3", "2", "1"]);

        let bob = manager.history(Some("bob"), 1).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].context, "2");
    }

    #[test]
    fn test_history_survives_reload() {
        let dir = tempdir().unwrap();
        let registry = registry();

        let id = {
            let manager =
                HandoffManager::with_log(Arc::clone(&registry), HandoffLog::new(dir.path())).unwrap();
            let handoff = manager.initiate("alice", "bob", "ctx", "why").unwrap();
            manager.acknowledge(&handoff.id, "bob").unwrap();
            handoff.id
        };

        let reloaded = HandoffManager::with_log(registry, HandoffLog::new(dir.path())).unwrap();
        let history = reloaded.history(None, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert!(history[0].acknowledged);
    }
}
