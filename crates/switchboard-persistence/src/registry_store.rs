//! Store for agent, team and lock state.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use switchboard_models::{Agent, LockTable, Team};
use tracing::{debug, warn};

use crate::atomic::{atomic_write_json, read_json, read_json_optional, remove_if_exists};
use crate::error::{PersistenceError, Result};

/// Persists registry records as one JSON file per entity, keyed by name.
///
/// ```text
/// base_path/
/// ├── agents/
/// │   ├── builder.json
/// │   └── reviewer.json
/// ├── teams/
/// │   └── %54eam%20%4Ceads.json
/// ├── locks.json
/// └── .lock
/// ```
///
/// Names are percent-escaped so any agent or team name maps to a safe file
/// name, distinct even on case-insensitive filesystems. Loading returns records ordered by creation time so that insertion
/// order survives a restart.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    base_path: PathBuf,
}

impl RegistryStore {
    /// Creates a store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn agents_dir(&self) -> PathBuf {
        self.base_path.join("agents")
    }

    fn teams_dir(&self) -> PathBuf {
        self.base_path.join("teams")
    }

    fn locks_path(&self) -> PathBuf {
        self.base_path.join("locks.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.base_path.join(".lock")
    }

    fn entity_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.json", escape_name(name)))
    }

    /// Saves (or overwrites) an agent.
    pub fn save_agent(&self, agent: &Agent) -> Result<()> {
        let path = Self::entity_path(&self.agents_dir(), &agent.name);
        debug!(agent = %agent.name, path = %path.display(), "Saving agent");
        atomic_write_json(&path, agent)
    }

    /// Deletes an agent record. Missing records are ignored.
    pub fn delete_agent(&self, name: &str) -> Result<()> {
        remove_if_exists(&Self::entity_path(&self.agents_dir(), name)).map(|_| ())
    }

    /// Loads a single agent by name.
    pub fn load_agent(&self, name: &str) -> Result<Option<Agent>> {
        read_json_optional(&Self::entity_path(&self.agents_dir(), name))
    }

    /// Loads every agent, oldest first.
    pub fn load_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = load_dir(&self.agents_dir())?;
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    /// Saves (or overwrites) a team.
    pub fn save_team(&self, team: &Team) -> Result<()> {
        let path = Self::entity_path(&self.teams_dir(), &team.name);
        debug!(team = %team.name, path = %path.display(), "Saving team");
        atomic_write_json(&path, team)
    }

    /// Deletes a team record. Missing records are ignored.
    pub fn delete_team(&self, name: &str) -> Result<()> {
        remove_if_exists(&Self::entity_path(&self.teams_dir(), name)).map(|_| ())
    }

    /// Loads every team, oldest first.
    pub fn load_teams(&self) -> Result<Vec<Team>> {
        let mut teams: Vec<Team> = load_dir(&self.teams_dir())?;
        teams.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(teams)
    }

    /// Saves the lock table.
    pub fn save_locks(&self, table: &LockTable) -> Result<()> {
        atomic_write_json(&self.locks_path(), table)
    }

    /// Loads the lock table, empty if none was saved.
    pub fn load_locks(&self) -> Result<LockTable> {
        Ok(read_json_optional(&self.locks_path())?.unwrap_or_default())
    }

    /// Takes an exclusive advisory lock on the state directory, blocking
    /// until other holders release it.
    ///
    /// Processes sharing a state directory serialize read-modify-write
    /// cycles on `locks.json` through this lock.
    pub fn lock_state(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.base_path).map_err(|source| PersistenceError::DirectoryError {
            path: self.base_path.clone(),
            source,
        })?;

        let path = self.lock_path();
        let lock_err = |source| PersistenceError::LockError {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        FileExt::lock_exclusive(&file).map_err(lock_err)?;
        debug!(path = %path.display(), "State directory locked");
        Ok(StateLock { _file: file })
    }
}

/// Held exclusive lock on a state directory. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
}

/// Loads every `*.json` file in `dir`. Unreadable files are skipped with a
/// warning so one bad record does not hide the rest.
fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let read_err = |source| PersistenceError::ReadError {
        path: dir.to_path_buf(),
        source,
    };

    let mut records = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.extension().is_some_and(|ext| ext == "json") {
            continue;
        }
        match read_json::<T>(&path) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
        }
    }
    Ok(records)
}

/// Escapes a name for use as a file stem.
///
/// Lowercase ASCII letters, digits, `-`, `_` and `.` pass through (a
/// leading `.` is escaped); every other byte, uppercase letters included,
/// becomes `%XX`.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let plain = byte.is_ascii_lowercase()
            || byte.is_ascii_digit()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && i > 0);
        if plain {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_models::{LockRecord, SessionId};
    use tempfile::tempdir;

    #[test]
    fn test_escape_name() {
        assert_eq!(escape_name("builder"), "builder");
        assert_eq!(escape_name("Team Leads"), "%54eam%20%4Ceads");
        assert_eq!(escape_name("../etc"), "%2E.%2Fetc");
        assert_eq!(escape_name("a/b"), "a%2Fb");
    }

    #[test]
    fn test_names_differing_in_case_get_distinct_files() {
        assert_ne!(
            escape_name("Api").to_lowercase(),
            escape_name("api").to_lowercase()
        );

        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        store.save_agent(&Agent::new("Api", "%1")).unwrap();
        store.save_agent(&Agent::new("api", "%2")).unwrap();

        assert_eq!(store.load_agents().unwrap().len(), 2);
        assert_eq!(
            store.load_agent("Api").unwrap().unwrap().session_id,
            SessionId::from("%1")
        );
    }

    #[test]
    fn test_lock_state_is_exclusive_across_handles() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let held = store.lock_state().unwrap();

        let (tx, rx) = mpsc::channel();
        let other = store.clone();
        let waiter = std::thread::spawn(move || {
            let _lock = other.lock_state().unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_agent_roundtrip_and_delete() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());

        let mut agent = Agent::new("builder", "%1");
        agent.teams.insert("backend".to_string());
        store.save_agent(&agent).unwrap();

        let loaded = store.load_agent("builder").unwrap().unwrap();
        assert_eq!(loaded, agent);

        store.delete_agent("builder").unwrap();
        assert!(store.load_agent("builder").unwrap().is_none());
        // Deleting twice is fine
        store.delete_agent("builder").unwrap();
    }

    #[test]
    fn test_load_agents_in_creation_order() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());

        let mut first = Agent::new("zeta", "%1");
        let mut second = Agent::new("alpha", "%2");
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        second.created_at = chrono::Utc::now();

        store.save_agent(&second).unwrap();
        store.save_agent(&first).unwrap();

        let names: Vec<_> = store
            .load_agents()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_load_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        store.save_team(&Team::new("Team Leads", "leads")).unwrap();
        fs::write(dir.path().join("teams/broken.json"), "{").unwrap();

        let teams = store.load_teams().unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].name, "Team Leads");
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        assert!(store.load_agents().unwrap().is_empty());
        assert!(store.load_teams().unwrap().is_empty());
        assert_eq!(store.load_locks().unwrap(), LockTable::default());
    }

    #[test]
    fn test_locks_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());

        let table = LockTable {
            locks: vec![LockRecord::new(SessionId::from("%3"), "builder")],
            requests: Vec::new(),
        };
        store.save_locks(&table).unwrap();
        assert_eq!(store.load_locks().unwrap(), table);
    }
}
