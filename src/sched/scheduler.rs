// src/sched/scheduler.rs

//! Topological readiness and greedy batch packing.
//!
//! The scheduler is deterministic: given the same pending set, completed
//! set and lock resolver it always produces the same batch. Candidates are
//! sorted by `(dependency count descending, id ascending)` before packing,
//! so tasks that unlock the most downstream work go first and ties break
//! reproducibly.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::errors::Result;
use crate::manifest::TaskCatalog;
use crate::sched::locks::{LockResolver, TaskLocks};
use crate::state::model::ComputedLocks;

/// The scheduler's output: tasks to co-schedule plus their combined locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub tasks: Vec<String>,
    pub locks: ComputedLocks,
}

/// Pending tasks whose dependencies are all in the effective completed set.
///
/// `completed` should already include externally satisfied dependencies.
/// The result is in catalog (id) order.
pub fn topological_ready(
    pending: &BTreeSet<String>,
    catalog: &TaskCatalog,
    completed: &BTreeSet<String>,
) -> Vec<String> {
    pending
        .iter()
        .filter(|id| match catalog.get(id) {
            Some(manifest) => manifest
                .dependencies
                .iter()
                .all(|dep| completed.contains(dep)),
            None => {
                warn!(task = %id, "pending task missing from catalog");
                false
            }
        })
        .cloned()
        .collect()
}

/// Greedily pack a batch from the ready set.
///
/// Admission rules, applied in sorted order:
/// - stop once `max_parallel` tasks are admitted,
/// - a candidate whose writes intersect its own reads is never admitted
///   (invalid manifest; rejected at catalog load, skipped defensively here),
/// - the candidate's writes must be disjoint from the batch's reads and
///   writes, and its reads disjoint from the batch's writes.
///
/// If `ready` is non-empty the plan is non-empty: a single task always fits.
pub fn plan_batch(
    ready: &[String],
    catalog: &TaskCatalog,
    resolver: &LockResolver,
    max_parallel: usize,
) -> Result<BatchPlan> {
    let mut candidates: Vec<&str> = ready.iter().map(|s| s.as_str()).collect();
    candidates.sort_by(|a, b| {
        let deps_a = catalog.get(a).map(|m| m.dependencies.len()).unwrap_or(0);
        let deps_b = catalog.get(b).map(|m| m.dependencies.len()).unwrap_or(0);
        deps_b.cmp(&deps_a).then_with(|| a.cmp(b))
    });

    let mut admitted: Vec<String> = Vec::new();
    let mut batch_reads: BTreeSet<String> = BTreeSet::new();
    let mut batch_writes: BTreeSet<String> = BTreeSet::new();

    for id in candidates {
        if admitted.len() >= max_parallel {
            break;
        }

        let manifest = match catalog.get(id) {
            Some(m) => m,
            None => continue,
        };
        if manifest.has_self_conflict() {
            warn!(task = %id, "skipping task whose writes intersect its own reads");
            continue;
        }

        let locks: TaskLocks = resolver.resolve(manifest)?;
        if !locks.disjoint_from(&batch_reads, &batch_writes) {
            debug!(task = %id, "lock conflict with batch; deferring to a later batch");
            continue;
        }

        batch_reads.extend(locks.reads);
        batch_writes.extend(locks.writes);
        admitted.push(id.to_string());
    }

    Ok(BatchPlan {
        tasks: admitted,
        locks: ComputedLocks {
            reads: batch_reads,
            writes: batch_writes,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::locks::LockResolver;
    use std::fs;

    /// Write a small catalog to a temp dir and load it.
    fn catalog(specs: &[(&str, &[&str], &[&str], &[&str])]) -> (tempfile::TempDir, TaskCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for (id, deps, reads, writes) in specs {
            let task_dir = dir.path().join(id);
            fs::create_dir_all(&task_dir).unwrap();
            let deps_toml: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
            let reads_toml: Vec<String> = reads.iter().map(|r| format!("\"{r}\"")).collect();
            let writes_toml: Vec<String> = writes.iter().map(|w| format!("\"{w}\"")).collect();
            fs::write(
                task_dir.join("task.toml"),
                format!(
                    "id = \"{id}\"\ndependencies = [{}]\n[locks]\nreads = [{}]\nwrites = [{}]\n",
                    deps_toml.join(", "),
                    reads_toml.join(", "),
                    writes_toml.join(", ")
                ),
            )
            .unwrap();
        }
        let catalog = crate::manifest::load_catalog(dir.path(), &[]).unwrap();
        (dir, catalog)
    }

    #[test]
    fn readiness_requires_all_deps_completed() {
        let (_dir, catalog) = catalog(&[
            ("a", &[], &[], &[]),
            ("b", &["a"], &[], &[]),
            ("c", &["a", "b"], &[], &[]),
        ]);
        let pending: BTreeSet<String> =
            ["b".to_string(), "c".to_string()].into_iter().collect();
        let completed: BTreeSet<String> = ["a".to_string()].into_iter().collect();

        let ready = topological_ready(&pending, &catalog, &completed);
        assert_eq!(ready, vec!["b".to_string()]);
    }

    #[test]
    fn external_deps_count_when_in_completed_set() {
        let (_dir, catalog) = catalog(&[("b", &["external"], &[], &[])]);
        let pending: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let completed: BTreeSet<String> = ["external".to_string()].into_iter().collect();

        let ready = topological_ready(&pending, &catalog, &completed);
        assert_eq!(ready, vec!["b".to_string()]);
    }

    #[test]
    fn disjoint_writers_share_a_batch() {
        let (_dir, catalog) = catalog(&[
            ("a", &[], &[], &["r1"]),
            ("b", &[], &[], &["r2"]),
        ]);
        let ready = vec!["a".to_string(), "b".to_string()];
        let plan = plan_batch(&ready, &catalog, &LockResolver::declared(), 2).unwrap();
        assert_eq!(plan.tasks, vec!["a".to_string(), "b".to_string()]);
        assert!(plan.locks.writes.contains("r1"));
        assert!(plan.locks.writes.contains("r2"));
    }

    #[test]
    fn writer_excludes_reader_of_same_resource() {
        let (_dir, catalog) = catalog(&[
            ("a", &[], &[], &["r1"]),
            ("b", &[], &["r1"], &[]),
        ]);
        let ready = vec!["a".to_string(), "b".to_string()];
        let plan = plan_batch(&ready, &catalog, &LockResolver::declared(), 2).unwrap();
        assert_eq!(plan.tasks, vec!["a".to_string()]);
    }

    #[test]
    fn parallelism_cap_bounds_batch_size() {
        let (_dir, catalog) = catalog(&[
            ("a", &[], &[], &[]),
            ("b", &[], &[], &[]),
            ("c", &[], &[], &[]),
        ]);
        let ready = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let plan = plan_batch(&ready, &catalog, &LockResolver::declared(), 2).unwrap();
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn packing_order_is_deps_desc_then_id_asc() {
        let (_dir, catalog) = catalog(&[
            ("apple", &[], &[], &[]),
            ("pear", &["x", "y"], &[], &[]),
            ("plum", &["x"], &[], &[]),
        ]);
        let ready = vec!["apple".to_string(), "pear".to_string(), "plum".to_string()];
        let plan = plan_batch(&ready, &catalog, &LockResolver::declared(), 3).unwrap();
        assert_eq!(
            plan.tasks,
            vec!["pear".to_string(), "plum".to_string(), "apple".to_string()]
        );
    }

    #[test]
    fn single_ready_task_always_fits() {
        let (_dir, catalog) = catalog(&[("a", &[], &[], &["r1"])]);
        let ready = vec!["a".to_string()];
        let plan = plan_batch(&ready, &catalog, &LockResolver::declared(), 1).unwrap();
        assert_eq!(plan.tasks.len(), 1);
    }
}
