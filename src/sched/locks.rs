// src/sched/locks.rs

//! Effective per-task lock resolution.
//!
//! Depending on the configured [`LockMode`], a task's read/write lock sets
//! come from its declared manifest, from a derived scope report written by
//! the control plane, or are empty (serialization disabled).

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::model::LockMode;
use crate::errors::Result;
use crate::manifest::model::TaskManifest;

/// Normalized lock sets for one task: deduplicated, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLocks {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
}

impl TaskLocks {
    /// Whether this task can share a batch with already-admitted locks.
    ///
    /// Admission requires the candidate's writes to be disjoint from the
    /// batch's reads and writes, and the candidate's reads to be disjoint
    /// from the batch's writes.
    pub fn disjoint_from(&self, batch_reads: &BTreeSet<String>, batch_writes: &BTreeSet<String>) -> bool {
        self.writes.is_disjoint(batch_reads)
            && self.writes.is_disjoint(batch_writes)
            && self.reads.is_disjoint(batch_writes)
    }
}

/// Scope report emitted by the control plane for derived lock mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeReport {
    #[serde(default)]
    pub reads: Vec<String>,

    #[serde(default)]
    pub derived_writes: Vec<String>,

    #[serde(default = "default_confidence")]
    pub confidence: String,
}

fn default_confidence() -> String {
    "high".to_string()
}

/// Resolves effective lock sets for tasks.
#[derive(Debug, Clone)]
pub struct LockResolver {
    mode: LockMode,
    /// Directory holding `<task>/scope.json` reports (derived mode).
    reports_dir: Option<PathBuf>,
    /// Resource unioned into writes when a report has low confidence.
    fallback_resource: Option<String>,
}

impl LockResolver {
    pub fn new(
        mode: LockMode,
        reports_dir: Option<PathBuf>,
        fallback_resource: Option<String>,
    ) -> Self {
        let fallback_resource = fallback_resource.filter(|s| !s.trim().is_empty());
        Self {
            mode,
            reports_dir,
            fallback_resource,
        }
    }

    pub fn declared() -> Self {
        Self::new(LockMode::Declared, None, None)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Effective lock sets for one task.
    pub fn resolve(&self, manifest: &TaskManifest) -> Result<TaskLocks> {
        match self.mode {
            LockMode::Off => Ok(TaskLocks::default()),
            LockMode::Declared => Ok(declared_locks(manifest)),
            LockMode::Derived => self.resolve_derived(manifest),
        }
    }

    fn resolve_derived(&self, manifest: &TaskManifest) -> Result<TaskLocks> {
        let report = self
            .reports_dir
            .as_ref()
            .map(|dir| dir.join(&manifest.id).join("scope.json"))
            .filter(|path| path.is_file());

        let path = match report {
            Some(path) => path,
            None => {
                debug!(task = %manifest.id, "no scope report; falling back to declared locks");
                return Ok(declared_locks(manifest));
            }
        };

        let report: ScopeReport = match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        {
            Ok(report) => report,
            Err(e) => {
                // Schema-incompatible reports demote to declared locks
                // rather than rejecting the run.
                warn!(task = %manifest.id, error = %e, "unreadable scope report; using declared locks");
                return Ok(declared_locks(manifest));
            }
        };

        let reads: BTreeSet<String> = report.reads.into_iter().collect();
        let mut writes: BTreeSet<String> = report.derived_writes.into_iter().collect();

        if report.confidence.eq_ignore_ascii_case("low") {
            if let Some(fallback) = self.fallback_resource.as_ref() {
                debug!(task = %manifest.id, fallback = %fallback, "low-confidence report; adding fallback resource");
                writes.insert(fallback.clone());
            }
        }

        Ok(TaskLocks { reads, writes })
    }
}

fn declared_locks(manifest: &TaskManifest) -> TaskLocks {
    TaskLocks {
        reads: manifest.read_locks(),
        writes: manifest.write_locks(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(toml: &str) -> TaskManifest {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn declared_mode_normalizes_locks() {
        let m = manifest(
            r#"
            id = "t"
            [locks]
            reads = ["b", "a", "b"]
            writes = ["z"]
            "#,
        );
        let locks = LockResolver::declared().resolve(&m).unwrap();
        assert_eq!(
            locks.reads.iter().cloned().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(locks.writes.len(), 1);
    }

    #[test]
    fn off_mode_disables_serialization() {
        let m = manifest(
            r#"
            id = "t"
            [locks]
            writes = ["z"]
            "#,
        );
        let resolver = LockResolver::new(LockMode::Off, None, None);
        assert_eq!(resolver.resolve(&m).unwrap(), TaskLocks::default());
    }

    #[test]
    fn derived_mode_reads_scope_report() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("t");
        std::fs::create_dir_all(&task_dir).unwrap();
        std::fs::write(
            task_dir.join("scope.json"),
            r#"{"reads": ["x"], "derived_writes": ["y"], "confidence": "high"}"#,
        )
        .unwrap();

        let m = manifest(
            r#"
            id = "t"
            [locks]
            writes = ["declared"]
            "#,
        );
        let resolver = LockResolver::new(
            LockMode::Derived,
            Some(dir.path().to_path_buf()),
            Some("fallback".to_string()),
        );
        let locks = resolver.resolve(&m).unwrap();
        assert!(locks.writes.contains("y"));
        assert!(!locks.writes.contains("declared"));
        assert!(!locks.writes.contains("fallback"));
    }

    #[test]
    fn low_confidence_unions_fallback_resource() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("t");
        std::fs::create_dir_all(&task_dir).unwrap();
        std::fs::write(
            task_dir.join("scope.json"),
            r#"{"derived_writes": ["y"], "confidence": "low"}"#,
        )
        .unwrap();

        let m = manifest(r#"id = "t""#);
        let resolver = LockResolver::new(
            LockMode::Derived,
            Some(dir.path().to_path_buf()),
            Some("repo".to_string()),
        );
        let locks = resolver.resolve(&m).unwrap();
        assert!(locks.writes.contains("y"));
        assert!(locks.writes.contains("repo"));
    }

    #[test]
    fn missing_report_falls_back_to_declared() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest(
            r#"
            id = "t"
            [locks]
            writes = ["declared"]
            "#,
        );
        let resolver = LockResolver::new(LockMode::Derived, Some(dir.path().to_path_buf()), None);
        let locks = resolver.resolve(&m).unwrap();
        assert!(locks.writes.contains("declared"));
    }
}
