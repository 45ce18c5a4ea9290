// src/ledger/model.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status a ledger entry may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryStatus {
    Complete,
    Skipped,
}

/// One completed task recorded for cross-run reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task_id: String,
    pub status: LedgerEntryStatus,

    /// Fingerprint of the manifest + spec at completion time.
    pub fingerprint: String,

    /// Merge commit of the batch that integrated this task.
    pub merge_commit: String,

    pub integration_doctor_passed: bool,
    pub completed_at: DateTime<Utc>,
    pub run_id: String,

    /// Who wrote the entry ("executor", "import", ...).
    pub source: String,

    pub updated_at: DateTime<Utc>,
}

/// The per-project ledger document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn get(&self, task_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(task_id)
    }

    /// Insert or replace an entry; last writer for a task id wins.
    pub fn upsert(&mut self, mut entry: LedgerEntry) {
        entry.updated_at = Utc::now();
        self.entries.insert(entry.task_id.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
