//! Append-only handoff log.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use switchboard_models::{Handoff, HandoffId};
use tracing::debug;

use crate::atomic::ensure_dir;
use crate::error::{PersistenceError, Result};

/// JSON-lines log of handoff records.
///
/// Every state change appends the full record. On load the last line for
/// each id wins, so acknowledging a handoff is just another append.
#[derive(Debug, Clone)]
pub struct HandoffLog {
    path: PathBuf,
}

impl HandoffLog {
    /// Creates a log at `base_path/handoffs.jsonl`.
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            path: base_path.as_ref().join("handoffs.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record.
    pub fn append(&self, handoff: &Handoff) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_dir(dir)?;
        }

        let mut line = serde_json::to_string(handoff)?;
        line.push('\n');

        let write_err = |source| PersistenceError::WriteError {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).map_err(write_err)?;

        debug!(handoff = %handoff.id, "Appended handoff record");
        Ok(())
    }

    /// Replays the log, returning the latest version of every handoff in
    /// order of first appearance.
    pub fn load(&self) -> Result<Vec<Handoff>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let data = fs::read_to_string(&self.path).map_err(|source| PersistenceError::ReadError {
            path: self.path.clone(),
            source,
        })?;

        let mut order: Vec<HandoffId> = Vec::new();
        let mut latest: HashMap<HandoffId, Handoff> = HashMap::new();

        for (idx, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Handoff =
                serde_json::from_str(line).map_err(|e| PersistenceError::CorruptRecord {
                    path: self.path.clone(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            if !latest.contains_key(&record.id) {
                order.push(record.id.clone());
            }
            latest.insert(record.id.clone(), record);
        }

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }
}
