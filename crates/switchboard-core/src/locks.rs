//! Per-session exclusive locks.
//!
//! A session is either unlocked or locked by exactly one agent. Every write
//! path consults [`LockManager::check_write`] before typing into a session.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use switchboard_models::{AccessRequest, LockRecord, LockTable, SessionId};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::registry::Registry;

#[derive(Debug, Default)]
struct LockState {
    locks: HashMap<SessionId, LockRecord>,
    requests: Vec<AccessRequest>,
}

/// Owns lock records for every session.
#[derive(Debug)]
pub struct LockManager {
    registry: Arc<Registry>,
    state: RwLock<LockState>,
}

impl LockManager {
    /// Creates a manager with no locks.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: RwLock::new(LockState::default()),
        }
    }

    /// Restores a manager from a persisted table.
    ///
    /// Locks and requests naming an agent missing from `registry` are
    /// dropped.
    pub fn from_table(registry: Arc<Registry>, table: LockTable) -> Result<Self> {
        let manager = Self::new(registry);
        let registry = Arc::clone(&manager.registry);
        manager.reload(table, |name| registry.contains_agent(name))?;
        Ok(manager)
    }

    /// Replaces every lock and request with those in `table`.
    ///
    /// Entries naming an agent for which `is_known` returns false are
    /// dropped with a warning.
    pub fn reload<F>(&self, table: LockTable, is_known: F) -> Result<()>
    where
        F: Fn(&str) -> Result<bool>,
    {
        let mut locks = HashMap::with_capacity(table.locks.len());
        for record in table.locks {
            if is_known(&record.owner)? {
                locks.insert(record.session_id.clone(), record);
            } else {
                warn!(session = %record.session_id, owner = %record.owner, "Dropping lock held by unknown agent");
            }
        }

        let mut requests = Vec::with_capacity(table.requests.len());
        for request in table.requests {
            if is_known(&request.requester)? && is_known(&request.owner)? {
                requests.push(request);
            } else {
                warn!(session = %request.session_id, requester = %request.requester, "Dropping access request for unknown agent");
            }
        }

        *self.write()? = LockState { locks, requests };
        Ok(())
    }

    /// Exports the current locks and pending requests.
    pub fn to_table(&self) -> Result<LockTable> {
        let state = self.read()?;
        let mut locks: Vec<LockRecord> = state.locks.values().cloned().collect();
        locks.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(LockTable {
            locks,
            requests: state.requests.clone(),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LockState>> {
        self.state
            .read()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LockState>> {
        self.state
            .write()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    fn require_agent(&self, agent: &str) -> Result<()> {
        if self.registry.contains_agent(agent)? {
            Ok(())
        } else {
            Err(CoreError::not_found("agent", agent))
        }
    }

    /// Locks `session` for `agent`.
    ///
    /// Returns `true` if a new lock was taken and `false` if `agent` already
    /// held it.
    ///
    /// # Errors
    ///
    /// `LockConflict` if another agent holds the lock, `NotFound` if the
    /// agent is not registered.
    pub fn acquire(&self, session: &SessionId, agent: &str) -> Result<bool> {
        // Registration is checked under the write guard so a concurrent
        // `release_all` for a removed agent cannot run in between.
        let mut state = self.write()?;
        self.require_agent(agent)?;

        if let Some(existing) = state.locks.get(session) {
            if existing.owner == agent {
                debug!(session = %session, agent = %agent, "Lock re-acquired by owner");
                return Ok(false);
            }
            return Err(CoreError::LockConflict {
                session: session.clone(),
                owner: existing.owner.clone(),
            });
        }

        state
            .locks
            .insert(session.clone(), LockRecord::new(session.clone(), agent));
        info!(session = %session, agent = %agent, "Session locked");
        Ok(true)
    }

    /// Releases `session` if `agent` owns it.
    ///
    /// The owner may always release, registered or not. Returns `false` if
    /// the session was not locked.
    ///
    /// # Errors
    ///
    /// `NotOwner` if another agent holds the lock, `NotFound` if a
    /// non-owner is not registered.
    pub fn release(&self, session: &SessionId, agent: &str) -> Result<bool> {
        let mut state = self.write()?;
        let owned = state.locks.get(session).map(|r| r.owner == agent);
        if owned != Some(true) {
            self.require_agent(agent)?;
            return match owned {
                None => Ok(false),
                _ => Err(CoreError::NotOwner {
                    session: session.clone(),
                    agent: agent.to_string(),
                }),
            };
        }

        state.locks.remove(session);
        state.requests.retain(|r| &r.session_id != session);
        info!(session = %session, agent = %agent, "Session unlocked");
        Ok(true)
    }

    /// Returns the owner of `session`, if locked.
    pub fn owner(&self, session: &SessionId) -> Result<Option<String>> {
        Ok(self.read()?.locks.get(session).map(|r| r.owner.clone()))
    }

    pub fn is_locked(&self, session: &SessionId) -> Result<bool> {
        Ok(self.read()?.locks.contains_key(session))
    }

    /// Checks whether `caller` may write to `session`.
    ///
    /// Writes are allowed when the session is unlocked or owned by the
    /// caller. Anonymous callers can only write to unlocked sessions.
    pub fn check_write(&self, session: &SessionId, caller: Option<&str>) -> Result<()> {
        let state = self.read()?;
        match state.locks.get(session) {
            Some(record) if Some(record.owner.as_str()) != caller => Err(CoreError::LockConflict {
                session: session.clone(),
                owner: record.owner.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Records a request from `requester` asking `owner` for access.
    ///
    /// Lock state is unchanged. Repeating an identical pending request
    /// returns the existing one.
    pub fn request_access(
        &self,
        session: &SessionId,
        requester: &str,
        owner: &str,
    ) -> Result<AccessRequest> {
        self.require_agent(requester)?;
        self.require_agent(owner)?;

        let mut state = self.write()?;
        if let Some(existing) = state.requests.iter().find(|r| {
            &r.session_id == session && r.requester == requester && r.owner == owner
        }) {
            return Ok(existing.clone());
        }

        let request = AccessRequest::new(session.clone(), requester, owner);
        state.requests.push(request.clone());
        debug!(session = %session, requester = %requester, owner = %owner, "Access requested");
        Ok(request)
    }

    /// Pending requests addressed to `owner`, oldest first.
    pub fn pending_requests(&self, owner: &str) -> Result<Vec<AccessRequest>> {
        Ok(self
            .read()?
            .requests
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }

    /// Transfers the lock on `session` from `owner` to `requester`.
    ///
    /// # Errors
    ///
    /// `NotOwner` unless `owner` currently holds the lock.
    pub fn grant_access(&self, session: &SessionId, owner: &str, requester: &str) -> Result<()> {
        self.require_agent(owner)?;
        self.require_agent(requester)?;

        let mut state = self.write()?;
        let record = state
            .locks
            .get_mut(session)
            .filter(|r| r.owner == owner)
            .ok_or_else(|| CoreError::NotOwner {
                session: session.clone(),
                agent: owner.to_string(),
            })?;
        *record = LockRecord::new(session.clone(), requester);
        state
            .requests
            .retain(|r| !(&r.session_id == session && r.requester == requester));

        info!(session = %session, from = %owner, to = %requester, "Lock transferred");
        Ok(())
    }

    /// Drops every lock and request involving `agent`. Returns the sessions
    /// that were unlocked.
    pub fn release_all(&self, agent: &str) -> Result<Vec<SessionId>> {
        let mut state = self.write()?;
        let mut released: Vec<SessionId> = state
            .locks
            .values()
            .filter(|r| r.owner == agent)
            .map(|r| r.session_id.clone())
            .collect();
        released.sort();

        for session in &released {
            state.locks.remove(session);
        }
        state
            .requests
            .retain(|r| r.owner != agent && r.requester != agent);

        if !released.is_empty() {
            debug!(agent = %agent, count = released.len(), "Released all locks");
        }
        Ok(released)
    }

    /// All current locks ordered by session.
    pub fn locks(&self) -> Result<Vec<LockRecord>> {
        Ok(self.to_table()?.locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LockManager {
        let registry = Arc::new(Registry::new());
        for (name, session) in [("x", "%1"), ("y", "%2"), ("z", "%3")] {
            registry.register_agent(name, session.into(), &[]).unwrap();
        }
        LockManager::new(registry)
    }

    fn s(id: &str) -> SessionId {
        SessionId::from(id)
    }

    #[test]
    fn test_acquire_conflict_and_release_cycle() {
        let locks = manager();
        assert!(locks.acquire(&s("%1"), "x").unwrap());

        let conflict = locks.acquire(&s("%1"), "y");
        assert!(matches!(conflict, Err(CoreError::LockConflict { ref owner, .. }) if owner == "x"));

        assert!(matches!(
            locks.release(&s("%1"), "y"),
            Err(CoreError::NotOwner { .. })
        ));

        assert!(locks.release(&s("%1"), "x").unwrap());
        assert!(locks.acquire(&s("%1"), "y").unwrap());
        assert_eq!(locks.owner(&s("%1")).unwrap().as_deref(), Some("y"));
    }

    #[test]
    fn test_acquire_is_reentrant() {
        let locks = manager();
        assert!(locks.acquire(&s("%1"), "x").unwrap());
        assert!(!locks.acquire(&s("%1"), "x").unwrap());
        assert_eq!(locks.locks().unwrap().len(), 1);
    }

    #[test]
    fn test_release_unlocked_session() {
        let locks = manager();
        assert!(!locks.release(&s("%1"), "x").unwrap());
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let locks = manager();
        assert!(matches!(
            locks.acquire(&s("%1"), "ghost"),
            Err(CoreError::NotFound { kind: "agent", .. })
        ));
    }

    #[test]
    fn test_check_write() {
        let locks = manager();
        assert!(locks.check_write(&s("%1"), None).is_ok());

        locks.acquire(&s("%1"), "x").unwrap();
        assert!(locks.check_write(&s("%1"), Some("x")).is_ok());
        assert!(matches!(
            locks.check_write(&s("%1"), Some("y")),
            Err(CoreError::LockConflict { .. })
        ));
        assert!(locks.check_write(&s("%1"), None).is_err());
    }

    #[test]
    fn test_request_and_grant_access() {
        let locks = manager();
        locks.acquire(&s("%1"), "x").unwrap();

        let request = locks.request_access(&s("%1"), "y", "x").unwrap();
        let again = locks.request_access(&s("%1"), "y", "x").unwrap();
        assert_eq!(request.id, again.id);
        assert!(locks.is_locked(&s("%1")).unwrap());

        let pending = locks.pending_requests("x").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester, "y");

        locks.grant_access(&s("%1"), "x", "y").unwrap();
        assert_eq!(locks.owner(&s("%1")).unwrap().as_deref(), Some("y"));
        assert!(locks.pending_requests("x").unwrap().is_empty());
    }

    #[test]
    fn test_request_access_requires_known_owner() {
        let locks = manager();
        assert!(matches!(
            locks.request_access(&s("%1"), "y", "nobody"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_grant_by_non_owner_fails() {
        let locks = manager();
        locks.acquire(&s("%1"), "x").unwrap();
        assert!(matches!(
            locks.grant_access(&s("%1"), "z", "y"),
            Err(CoreError::NotOwner { .. })
        ));
        assert!(matches!(
            locks.grant_access(&s("%2"), "x", "y"),
            Err(CoreError::NotOwner { .. })
        ));
    }

    #[test]
    fn test_release_all() {
        let locks = manager();
        locks.acquire(&s("%2"), "x").unwrap();
        locks.acquire(&s("%1"), "x").unwrap();
        locks.acquire(&s("%3"), "y").unwrap();
        locks.request_access(&s("%3"), "x", "y").unwrap();

        let released = locks.release_all("x").unwrap();
        assert_eq!(released, vec![s("%1"), s("%2")]);
        assert!(locks.pending_requests("y").unwrap().is_empty());
        assert!(locks.is_locked(&s("%3")).unwrap());
    }

    #[test]
    fn test_table_roundtrip() {
        let locks = manager();
        locks.acquire(&s("%1"), "x").unwrap();
        let table = locks.to_table().unwrap();

        let restored = LockManager::from_table(Arc::clone(&locks.registry), table).unwrap();
        assert_eq!(restored.owner(&s("%1")).unwrap().as_deref(), Some("x"));
    }

    fn table_with_ghost() -> LockTable {
        LockTable {
            locks: vec![
                LockRecord::new(s("%1"), "ghost"),
                LockRecord::new(s("%2"), "y"),
            ],
            requests: vec![
                AccessRequest::new(s("%2"), "ghost", "y"),
                AccessRequest::new(s("%2"), "x", "y"),
            ],
        }
    }

    #[test]
    fn test_restore_drops_unknown_owners() {
        let registry = Arc::clone(&manager().registry);
        let locks = LockManager::from_table(registry, table_with_ghost()).unwrap();

        assert_eq!(locks.owner(&s("%1")).unwrap(), None);
        assert!(locks.acquire(&s("%1"), "y").unwrap());
        assert_eq!(locks.owner(&s("%2")).unwrap().as_deref(), Some("y"));

        let pending = locks.pending_requests("y").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester, "x");
    }

    #[test]
    fn test_unregistered_owner_can_release() {
        let locks = manager();
        locks.acquire(&s("%1"), "x").unwrap();
        locks.registry.remove_agent("x").unwrap();

        assert!(locks.release(&s("%1"), "x").unwrap());
        assert!(!locks.is_locked(&s("%1")).unwrap());
        assert!(matches!(
            locks.release(&s("%1"), "x"),
            Err(CoreError::NotFound { kind: "agent", .. })
        ));
    }

    #[test]
    fn test_acquire_after_removal_is_rejected() {
        let locks = manager();
        locks.registry.remove_agent("z").unwrap();
        locks.release_all("z").unwrap();

        assert!(matches!(
            locks.acquire(&s("%3"), "z"),
            Err(CoreError::NotFound { kind: "agent", .. })
        ));
        assert!(locks.locks().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let registry = Arc::new(Registry::new());
        let names: Vec<String> = (0..8).map(|i| format!("agent-{}", i)).collect();
        for (i, name) in names.iter().enumerate() {
            registry
                .register_agent(name, format!("%{}", i).into(), &[])
                .unwrap();
        }
        let locks = Arc::new(LockManager::new(registry));
        let barrier = Arc::new(std::sync::Barrier::new(names.len()));

        let handles: Vec<_> = names
            .into_iter()
            .map(|name| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    locks.acquire(&s("%shared"), &name)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| matches!(r, Ok(true))).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(CoreError::LockConflict { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(locks.locks().unwrap().len(), 1);
    }
}
