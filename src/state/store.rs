// src/state/store.rs

//! Atomic persistence for `RunState`.
//!
//! `save` writes to a sibling temp path in the same directory, fsyncs the
//! file, renames it over the destination and fsyncs the parent directory.
//! A crash at any point leaves either the previous document or the new one
//! on disk, never a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, SwarmdagError};
use crate::state::model::{RunState, STATE_SCHEMA_VERSION};

const STATE_FILE: &str = "state.json";

/// Store for one run's `state.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `<home>/projects/<project>/runs/<run_id>/`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn exists(&self) -> bool {
        self.state_path().is_file()
    }

    /// Load and schema-check the persisted document.
    pub fn load(&self) -> Result<RunState> {
        let path = self.state_path();
        let contents = fs::read_to_string(&path).map_err(|e| {
            SwarmdagError::StateError(format!("reading state at {:?}: {}", path, e))
        })?;

        let state: RunState = serde_json::from_str(&contents)?;

        if state.schema_version != STATE_SCHEMA_VERSION {
            return Err(SwarmdagError::SchemaVersion {
                found: state.schema_version,
                expected: STATE_SCHEMA_VERSION,
            });
        }

        Ok(state)
    }

    /// Atomically persist the document.
    pub fn save(&self, state: &RunState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string_pretty(state)?;
        let final_path = self.state_path();
        let tmp_path = self.dir.join(format!("{}.tmp.{}", STATE_FILE, std::process::id()));

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &final_path)?;
        sync_dir(&self.dir)?;

        debug!(path = ?final_path, run_id = %state.run_id, "persisted run state");
        Ok(())
    }
}

/// fsync a directory so a rename survives a crash.
///
/// Directory handles cannot be fsynced on some platforms (notably Windows);
/// treat that as best-effort.
fn sync_dir(dir: &Path) -> Result<()> {
    match File::open(dir) {
        Ok(handle) => {
            let _ = handle.sync_all();
            Ok(())
        }
        Err(_) if cfg!(windows) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_state() -> RunState {
        RunState::new(
            "run-7",
            "demo",
            PathBuf::from("/repo"),
            "main",
            ["a".to_string(), "b".to_string()],
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.tasks.len(), 2);
        assert_eq!(loaded.schema_version, STATE_SCHEMA_VERSION);
    }

    #[test]
    fn save_overwrites_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = sample_state();

        store.save(&state).unwrap();
        state.tokens_used = 42;
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap().tokens_used, 42);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = sample_state();
        state.schema_version = 99;

        store.save(&state).unwrap();
        assert!(matches!(
            store.load(),
            Err(SwarmdagError::SchemaVersion { found: 99, .. })
        ));
    }

    #[test]
    fn exists_reflects_on_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(!store.exists());
        store.save(&sample_state()).unwrap();
        assert!(store.exists());
    }
}
