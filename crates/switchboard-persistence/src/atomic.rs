//! Crash-safe file helpers.
//!
//! Writes go to a temporary file in the destination directory and are then
//! renamed over the target, so readers never observe a half-written file.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PersistenceError, Result};

/// Creates `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|source| PersistenceError::DirectoryError {
        path: dir.to_path_buf(),
        source,
    })
}

/// Replaces the contents of `path` with `data` atomically.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    ensure_dir(dir)?;

    let write_err = |source| PersistenceError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    staged.write_all(data).map_err(write_err)?;
    staged.flush().map_err(write_err)?;
    staged.persist(path).map_err(|e| write_err(e.error))?;

    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Reads and decodes a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|source| PersistenceError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&data)?)
}

/// Like [`read_json`] but returns `None` when the file is absent.
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Deletes `path` if it exists. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).map_err(|source| PersistenceError::WriteError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}
