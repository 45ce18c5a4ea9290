// src/ledger/reuse.rs

//! Ledger-based work reuse.
//!
//! At run start, pending tasks whose ledger entry is *eligible* are seeded
//! straight to `complete` without launching a worker. Eligibility requires:
//!
//! 1. the entry's merge commit is an ancestor of the repo's current HEAD, and
//! 2. the entry's fingerprint matches the task's current on-disk files
//!    (only checked when the task exists in this run's catalog).
//!
//! Dependencies that live outside the catalog are resolved the same way,
//! but only count towards readiness; they are never materialized as tasks
//! in `RunState`.

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::ledger::model::{Ledger, LedgerEntry};
use crate::ledger::store::recompute_fingerprint;
use crate::manifest::TaskCatalog;
use crate::ports::events::EventSink;
use crate::ports::vcs::Vcs;
use crate::state::model::{RunState, TaskStatus};
use crate::state::transitions;

/// Whether one ledger entry may stand in for running its task.
pub async fn entry_eligible(
    entry: &LedgerEntry,
    catalog: &TaskCatalog,
    vcs: &dyn Vcs,
    repo_path: &Path,
    head: &str,
) -> Result<bool> {
    if !entry.integration_doctor_passed {
        return Ok(false);
    }

    if !vcs.is_ancestor(repo_path, &entry.merge_commit, head).await? {
        debug!(
            task = %entry.task_id,
            merge_commit = %entry.merge_commit,
            "ledger entry not reachable from HEAD"
        );
        return Ok(false);
    }

    if catalog.contains(&entry.task_id) {
        let current = recompute_fingerprint(catalog, &entry.task_id)?;
        if current != entry.fingerprint {
            debug!(task = %entry.task_id, "ledger fingerprint stale");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Ids of catalog tasks whose ledger entries are eligible for reuse.
pub async fn eligible_entries(
    ledger: &Ledger,
    catalog: &TaskCatalog,
    vcs: &dyn Vcs,
    repo_path: &Path,
    head: &str,
) -> Result<Vec<String>> {
    let mut eligible = Vec::new();
    for (task_id, entry) in ledger.entries.iter() {
        if !catalog.contains(task_id) {
            continue;
        }
        if entry_eligible(entry, catalog, vcs, repo_path, head).await? {
            eligible.push(task_id.clone());
        }
    }
    Ok(eligible)
}

/// Seed pending tasks to `complete` from eligible ledger entries.
///
/// Returns the seeded task ids.
pub async fn seed_from_ledger(
    state: &mut RunState,
    ledger: &Ledger,
    catalog: &TaskCatalog,
    vcs: &dyn Vcs,
    events: &dyn EventSink,
) -> Result<Vec<String>> {
    let head = vcs.head_sha(&state.repo_path).await?;
    let repo_path = state.repo_path.clone();
    let mut seeded = Vec::new();

    let pending: Vec<String> = state.tasks_with_status(TaskStatus::Pending);
    for task_id in pending {
        let entry = match ledger.get(&task_id) {
            Some(e) => e,
            None => continue,
        };
        if entry_eligible(entry, catalog, vcs, &repo_path, &head).await? {
            transitions::seed_task_complete(state, &task_id)?;
            events.log(
                "task.seeded_complete",
                Some(&task_id),
                json!({
                    "merge_commit": &entry.merge_commit,
                    "source_run_id": &entry.run_id,
                }),
            );
            info!(task = %task_id, source_run = %entry.run_id, "seeded complete from ledger");
            seeded.push(task_id);
        }
    }
    Ok(seeded)
}

/// Resolve dependencies that are not in the catalog against the ledger.
///
/// The returned ids are unioned into the effective completed set for
/// readiness purposes only; they are never marked complete in `RunState`.
pub async fn external_completed_deps(
    catalog: &TaskCatalog,
    ledger: &Ledger,
    vcs: &dyn Vcs,
    repo_path: &Path,
) -> Result<BTreeSet<String>> {
    let mut external: BTreeSet<String> = BTreeSet::new();
    for manifest in catalog.manifests() {
        for dep in manifest.dependencies.iter() {
            if !catalog.contains(dep) {
                external.insert(dep.clone());
            }
        }
    }
    if external.is_empty() {
        return Ok(BTreeSet::new());
    }

    let head = vcs.head_sha(repo_path).await?;
    let mut satisfied = BTreeSet::new();
    for dep in external {
        match ledger.get(&dep) {
            Some(entry) if entry_eligible(entry, catalog, vcs, repo_path, &head).await? => {
                satisfied.insert(dep);
            }
            Some(_) => {
                warn!(dep = %dep, "external dependency present in ledger but not eligible");
            }
            None => {}
        }
    }
    Ok(satisfied)
}
