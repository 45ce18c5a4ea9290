// src/sched/blockage.rs

//! Classification of an empty ready set.
//!
//! When pending tasks exist but none is ready, the run either pauses for
//! the operator (the unmet dependency chains end in blocked-status tasks)
//! or fails outright (dependencies are missing entirely, or every chain
//! ends in still-pending tasks, i.e. a deadlock that no amount of waiting
//! resolves).

use std::collections::BTreeSet;

use crate::manifest::TaskCatalog;
use crate::sched::graph::TaskGraph;
use crate::state::model::{RunState, TaskStatus};

/// Why the scheduler produced no ready task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blockage {
    /// Operator attention required; lists the blocked-status tasks that
    /// unmet dependency chains resolve to.
    Paused { blocked_tasks: Vec<String> },
    /// The run cannot make progress at all.
    Failed { reason: String },
}

/// Classify the blockage for the current pending set.
///
/// Unmet dependencies are followed transitively: a pending task waiting on
/// another pending task whose own dependency is parked in
/// `needs_human_review` is operator-fixable, not deadlocked.
/// `effective_completed` must include externally satisfied dependencies.
pub fn classify_blockage(
    state: &RunState,
    catalog: &TaskCatalog,
    effective_completed: &BTreeSet<String>,
) -> Blockage {
    let graph = TaskGraph::from_catalog(catalog);

    let mut missing: BTreeSet<String> = BTreeSet::new();
    let mut blocked: BTreeSet<String> = BTreeSet::new();
    let mut waiting: BTreeSet<String> = BTreeSet::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();

    for (task_id, task) in state.tasks.iter() {
        if task.status != TaskStatus::Pending {
            continue;
        }
        if !catalog.contains(task_id) {
            missing.insert(task_id.clone());
            continue;
        }
        visit_unmet_deps(
            task_id,
            &graph,
            state,
            effective_completed,
            &mut visited,
            &mut missing,
            &mut blocked,
            &mut waiting,
        );
    }

    if !missing.is_empty() {
        return Blockage::Failed {
            reason: format!(
                "missing dependencies: {}",
                missing.into_iter().collect::<Vec<_>>().join(", ")
            ),
        };
    }

    if !blocked.is_empty() {
        return Blockage::Paused {
            blocked_tasks: blocked.into_iter().collect(),
        };
    }

    Blockage::Failed {
        reason: format!(
            "deadlock: pending tasks wait only on still-pending dependencies ({})",
            waiting.into_iter().collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Walk the unmet dependency chain of `task_id`, partitioning what each
/// chain ends in.
#[allow(clippy::too_many_arguments)]
fn visit_unmet_deps(
    task_id: &str,
    graph: &TaskGraph,
    state: &RunState,
    effective_completed: &BTreeSet<String>,
    visited: &mut BTreeSet<String>,
    missing: &mut BTreeSet<String>,
    blocked: &mut BTreeSet<String>,
    waiting: &mut BTreeSet<String>,
) {
    if !visited.insert(task_id.to_string()) {
        return;
    }

    for dep in graph.dependencies_of(task_id) {
        if effective_completed.contains(dep) {
            continue;
        }
        match state.task(dep) {
            None => {
                missing.insert(dep.clone());
            }
            Some(dep_state) if dep_state.status.is_blocked() => {
                blocked.insert(dep.clone());
            }
            Some(_) => {
                waiting.insert(dep.clone());
                // A still-pending dependency may itself be stuck further up
                // the chain.
                visit_unmet_deps(
                    dep,
                    graph,
                    state,
                    effective_completed,
                    visited,
                    missing,
                    blocked,
                    waiting,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::transitions;
    use std::fs;
    use std::path::PathBuf;

    fn catalog_with(specs: &[(&str, &[&str])]) -> (tempfile::TempDir, TaskCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for (id, deps) in specs {
            let task_dir = dir.path().join(id);
            fs::create_dir_all(&task_dir).unwrap();
            let deps_toml: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
            fs::write(
                task_dir.join("task.toml"),
                format!("id = \"{id}\"\ndependencies = [{}]\n", deps_toml.join(", ")),
            )
            .unwrap();
        }
        let catalog = crate::manifest::load_catalog(dir.path(), &[]).unwrap();
        (dir, catalog)
    }

    fn state_for(catalog: &TaskCatalog) -> RunState {
        RunState::new(
            "run-1",
            "demo",
            PathBuf::from("/repo"),
            "main",
            catalog.ids().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn blocked_dependency_pauses_the_run() {
        let (_dir, catalog) = catalog_with(&[("a", &[]), ("b", &["a"])]);
        let mut state = state_for(&catalog);
        transitions::start_batch(&mut state, 1, &["a".to_string()], Default::default()).unwrap();
        transitions::mark_task_failed(&mut state, "a", "worker exited 1").unwrap();

        let blockage = classify_blockage(&state, &catalog, &BTreeSet::new());
        assert_eq!(
            blockage,
            Blockage::Paused {
                blocked_tasks: vec!["a".to_string()]
            }
        );
    }

    #[test]
    fn transitively_blocked_chain_still_pauses() {
        // c -> b -> a, with a failed: b and c are pending, but the chain
        // bottoms out in an operator-fixable task.
        let (_dir, catalog) = catalog_with(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let mut state = state_for(&catalog);
        transitions::start_batch(&mut state, 1, &["a".to_string()], Default::default()).unwrap();
        transitions::mark_task_failed(&mut state, "a", "worker exited 1").unwrap();

        match classify_blockage(&state, &catalog, &BTreeSet::new()) {
            Blockage::Paused { blocked_tasks } => {
                assert_eq!(blocked_tasks, vec!["a".to_string()]);
            }
            other => panic!("expected paused, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_fails_the_run() {
        let (_dir, catalog) = catalog_with(&[("b", &["ghost"])]);
        let state = state_for(&catalog);

        match classify_blockage(&state, &catalog, &BTreeSet::new()) {
            Blockage::Failed { reason } => assert!(reason.contains("ghost")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn externally_satisfied_dep_is_not_missing() {
        let (_dir, catalog) = catalog_with(&[("b", &["ghost"]), ("c", &["b"])]);
        let state = state_for(&catalog);
        let external: BTreeSet<String> = ["ghost".to_string()].into_iter().collect();

        // b is ready (external dep satisfied), so classification is not
        // invoked in practice; but if it were, c waits on pending b.
        match classify_blockage(&state, &catalog, &external) {
            Blockage::Failed { reason } => assert!(reason.contains("deadlock")),
            other => panic!("expected deadlock classification, got {other:?}"),
        }
    }
}
