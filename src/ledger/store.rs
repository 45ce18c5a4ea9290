// src/ledger/store.rs

//! Persistence for the per-project ledger.
//!
//! Mutations are read-modify-write under an exclusive advisory lock on a
//! sibling `ledger.lock` file, so concurrent runs of different projects or
//! processes serialize correctly. The document itself is written with the
//! same temp + rename + fsync discipline as the state store.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::errors::{Result, SwarmdagError};
use crate::ledger::model::{Ledger, LedgerEntry, LedgerEntryStatus};
use crate::manifest::fingerprint::fingerprint_manifest;
use crate::manifest::TaskCatalog;
use crate::state::model::{BatchStatus, RunState, TaskStatus};

const LEDGER_FILE: &str = "ledger.json";
const LOCK_FILE: &str = "ledger.lock";

/// Outcome of importing ledger entries from a completed run.
///
/// Partial success is allowed: failures are collected per task and the
/// successfully imported entries stay written.
#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub imported: Vec<String>,
    pub failures: Vec<(String, String)>,
}

/// Store for one project's `ledger.json`.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    /// Store rooted at `<home>/projects/<project>/`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Load the ledger, or `None` if the project has none yet.
    pub fn load(&self) -> Result<Option<Ledger>> {
        let path = self.ledger_path();
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|e| {
            SwarmdagError::LedgerError(format!("reading ledger at {:?}: {}", path, e))
        })?;
        let ledger: Ledger = serde_json::from_str(&contents)?;
        Ok(Some(ledger))
    }

    /// Insert or replace one entry under the project lock.
    pub fn upsert(&self, entry: LedgerEntry) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let mut ledger = self.load()?.unwrap_or_default();
        debug!(task = %entry.task_id, fingerprint = %entry.fingerprint, "upserting ledger entry");
        ledger.upsert(entry);
        self.write_locked(&ledger)
    }

    /// Insert or replace many entries under a single lock acquisition.
    pub fn upsert_all(&self, entries: Vec<LedgerEntry>) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let mut ledger = self.load()?.unwrap_or_default();
        for entry in entries {
            debug!(task = %entry.task_id, "upserting ledger entry");
            ledger.upsert(entry);
        }
        self.write_locked(&ledger)
    }

    /// Walk a completed run and import ledger entries for every task in a
    /// terminal-success status whose batch passed the integration doctor.
    ///
    /// Fingerprints are recomputed from the catalog's on-disk files, so the
    /// entries reflect what is actually in the tree now. Failures are
    /// collected and returned; the successful subset is still written.
    pub fn import_from_run(
        &self,
        run_state: &RunState,
        catalog: &TaskCatalog,
    ) -> Result<ImportOutcome> {
        let mut outcome = ImportOutcome::default();
        let mut entries = Vec::new();

        for (task_id, task) in run_state.tasks.iter() {
            let status = match task.status {
                TaskStatus::Complete => LedgerEntryStatus::Complete,
                TaskStatus::Skipped => LedgerEntryStatus::Skipped,
                _ => continue,
            };

            let batch = task
                .batch_id
                .and_then(|id| run_state.batches.iter().find(|b| b.batch_id == id));
            let batch = match batch {
                Some(b)
                    if b.status == BatchStatus::Complete
                        && b.integration_doctor_passed == Some(true) =>
                {
                    b
                }
                _ => {
                    debug!(task = %task_id, "skipping import: no doctor-passed batch");
                    continue;
                }
            };
            let merge_commit = match batch.merge_commit.as_ref() {
                Some(sha) => sha.clone(),
                None => {
                    warn!(task = %task_id, batch = batch.batch_id, "batch has no merge commit; skipping import");
                    continue;
                }
            };

            match recompute_fingerprint(catalog, task_id) {
                Ok(fingerprint) => {
                    entries.push(LedgerEntry {
                        task_id: task_id.clone(),
                        status,
                        fingerprint,
                        merge_commit,
                        integration_doctor_passed: true,
                        completed_at: task.completed_at.unwrap_or(run_state.updated_at),
                        run_id: run_state.run_id.clone(),
                        source: "import".to_string(),
                        updated_at: Utc::now(),
                    });
                    outcome.imported.push(task_id.clone());
                }
                Err(e) => {
                    outcome.failures.push((task_id.clone(), e.to_string()));
                }
            }
        }

        if !entries.is_empty() {
            self.upsert_all(entries)?;
        }
        Ok(outcome)
    }

    fn acquire_lock(&self) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive().map_err(|e| {
            SwarmdagError::LedgerError(format!("acquiring ledger lock: {}", e))
        })?;
        Ok(lock)
    }

    /// Write the document; caller must hold the lock.
    fn write_locked(&self, ledger: &Ledger) -> Result<()> {
        let json = serde_json::to_string_pretty(ledger)?;
        let final_path = self.ledger_path();
        let tmp_path = self
            .dir
            .join(format!("{}.tmp.{}", LEDGER_FILE, std::process::id()));

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
        Ok(())
    }
}

/// Recompute a task's fingerprint from the catalog's on-disk files.
pub fn recompute_fingerprint(catalog: &TaskCatalog, task_id: &str) -> Result<String> {
    let manifest = catalog
        .get(task_id)
        .ok_or_else(|| SwarmdagError::TaskNotFound(task_id.to_string()))?;
    let spec_path = catalog.spec_path(task_id);
    let spec = if spec_path.is_file() {
        fs::read(&spec_path)?
    } else {
        Vec::new()
    };
    fingerprint_manifest(manifest, &spec)
}

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
