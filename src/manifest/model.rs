// src/manifest/model.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single task manifest as read from `tasks/<id>/task.toml`.
///
/// ```toml
/// id = "add-metrics"
/// name = "Add metrics endpoint"
/// dependencies = ["wire-router"]
///
/// [locks]
/// reads = ["router"]
/// writes = ["metrics"]
///
/// [files]
/// reads = ["src/router/**"]
/// writes = ["src/metrics/**"]
///
/// [verify]
/// doctor = "cargo test -p metrics"
/// ```
///
/// The manifest is immutable for the duration of a run, except through the
/// rescope pipeline which rewrites it on disk and swaps the in-memory copy.
///
/// Serialization order matters for the ledger fingerprint: the canonical
/// form is produced by [`crate::manifest::fingerprint::canonical_manifest_json`],
/// which sorts keys at every level, so field order here is not load-bearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Ids of tasks that must be complete before this task may run.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub locks: LockSets,

    #[serde(default)]
    pub files: FilePatterns,

    #[serde(default)]
    pub verify: VerifySection,

    /// Opaque descriptive fields (owner, rationale, ...) carried through
    /// untouched; they participate in the fingerprint.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskManifest {
    /// Declared resource reads, deduplicated and sorted.
    pub fn read_locks(&self) -> BTreeSet<String> {
        self.locks.reads.iter().cloned().collect()
    }

    /// Declared resource writes, deduplicated and sorted.
    pub fn write_locks(&self) -> BTreeSet<String> {
        self.locks.writes.iter().cloned().collect()
    }

    /// A manifest whose writes intersect its own reads is invalid: the
    /// scheduler would never be able to admit it.
    pub fn has_self_conflict(&self) -> bool {
        let reads = self.read_locks();
        self.locks.writes.iter().any(|w| reads.contains(w))
    }
}

/// `[locks]`: resource names this task reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockSets {
    #[serde(default)]
    pub reads: Vec<String>,

    #[serde(default)]
    pub writes: Vec<String>,
}

/// `[files]`: glob patterns for the files this task is expected to touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilePatterns {
    #[serde(default)]
    pub reads: Vec<String>,

    #[serde(default)]
    pub writes: Vec<String>,
}

/// `[verify]`: per-task verification commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifySection {
    /// Per-task doctor command; overrides the project doctor when present.
    #[serde(default)]
    pub doctor: String,
}
