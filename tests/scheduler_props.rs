// tests/scheduler_props.rs

//! Property tests for the scheduler: DAG safety, lock mutual exclusion,
//! the parallelism bound and deterministic packing over randomized
//! catalogs.

use std::collections::BTreeSet;

use proptest::prelude::*;

use swarmdag::manifest::{load_catalog, TaskCatalog};
use swarmdag::sched::locks::LockResolver;
use swarmdag::sched::scheduler::{plan_batch, topological_ready};
use swarmdag_test_utils::builders::{CatalogBuilder, TaskSpecBuilder};

/// Description of one randomized task.
#[derive(Debug, Clone)]
struct GenTask {
    deps: Vec<usize>,
    reads: Vec<u8>,
    writes: Vec<u8>,
}

/// Strategy: up to `max_tasks` tasks; task N may only depend on tasks
/// 0..N-1 (guarantees acyclicity); locks drawn from a pool of 4 resources,
/// with self read/write overlaps removed.
fn catalog_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<GenTask>> {
    prop::collection::vec(
        (
            prop::collection::vec(any::<prop::sample::Index>(), 0..3),
            prop::collection::vec(0u8..4, 0..2),
            prop::collection::vec(0u8..4, 0..2),
        ),
        1..=max_tasks,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (dep_indices, reads, mut writes))| {
                let mut deps: Vec<usize> = dep_indices
                    .into_iter()
                    .filter_map(|idx| (i > 0).then(|| idx.index(i)))
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                // A task may not read and write the same resource.
                writes.retain(|w| !reads.contains(w));
                GenTask { deps, reads, writes }
            })
            .collect()
    })
}

fn materialize(tasks: &[GenTask]) -> (tempfile::TempDir, TaskCatalog) {
    let dir = tempfile::tempdir().expect("catalog tempdir");
    let mut builder = CatalogBuilder::new();
    for (i, task) in tasks.iter().enumerate() {
        let mut spec = TaskSpecBuilder::new(&format!("task-{i:02}"));
        for dep in &task.deps {
            spec = spec.dep(&format!("task-{dep:02}"));
        }
        for r in &task.reads {
            spec = spec.reads(&format!("res-{r}"));
        }
        for w in &task.writes {
            spec = spec.writes(&format!("res-{w}"));
        }
        builder = builder.with_task(spec);
    }
    builder.write(dir.path());
    let catalog = load_catalog(dir.path(), &[]).expect("valid generated catalog");
    (dir, catalog)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Simulate a full run by repeatedly packing batches and completing
    /// them; check the quantified scheduler invariants on every batch.
    #[test]
    fn packed_batches_respect_invariants(
        tasks in catalog_strategy(8),
        max_parallel in 1usize..4,
    ) {
        let (_dir, catalog) = materialize(&tasks);
        let resolver = LockResolver::declared();

        let mut pending: BTreeSet<String> =
            catalog.ids().map(|s| s.to_string()).collect();
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut rounds = 0usize;

        while !pending.is_empty() {
            rounds += 1;
            prop_assert!(rounds <= tasks.len() + 1, "scheduler failed to terminate");

            let ready = topological_ready(&pending, &catalog, &completed);
            prop_assert!(!ready.is_empty(), "acyclic catalog must always progress");

            let plan = plan_batch(&ready, &catalog, &resolver, max_parallel).unwrap();
            prop_assert!(!plan.tasks.is_empty());

            // Parallelism bound.
            prop_assert!(plan.tasks.len() <= max_parallel);

            // DAG safety: every admitted task's deps were completed before
            // the batch.
            for id in &plan.tasks {
                let manifest = catalog.get(id).unwrap();
                for dep in &manifest.dependencies {
                    prop_assert!(
                        completed.contains(dep),
                        "task {} admitted before dep {}",
                        id,
                        dep
                    );
                }
            }

            // Lock mutual exclusion, pairwise.
            for a in &plan.tasks {
                for b in &plan.tasks {
                    if a == b {
                        continue;
                    }
                    let la = resolver.resolve(catalog.get(a).unwrap()).unwrap();
                    let lb = resolver.resolve(catalog.get(b).unwrap()).unwrap();
                    prop_assert!(
                        la.writes.is_disjoint(&lb.writes),
                        "write/write overlap between {a} and {b}"
                    );
                    prop_assert!(
                        la.writes.is_disjoint(&lb.reads),
                        "write/read overlap between {a} and {b}"
                    );
                }
            }

            // Determinism: packing the same inputs again yields the same plan.
            let replay = plan_batch(&ready, &catalog, &resolver, max_parallel).unwrap();
            prop_assert_eq!(&plan, &replay);

            for id in &plan.tasks {
                pending.remove(id);
                completed.insert(id.clone());
            }
        }
    }

    /// The ready set is exactly the pending tasks whose deps are completed.
    #[test]
    fn readiness_matches_definition(tasks in catalog_strategy(8)) {
        let (_dir, catalog) = materialize(&tasks);

        // Mark a prefix of tasks complete.
        let all: Vec<String> = catalog.ids().map(|s| s.to_string()).collect();
        let completed: BTreeSet<String> =
            all.iter().take(all.len() / 2).cloned().collect();
        let pending: BTreeSet<String> =
            all.iter().skip(all.len() / 2).cloned().collect();

        let ready = topological_ready(&pending, &catalog, &completed);
        for id in &pending {
            let manifest = catalog.get(id).unwrap();
            let expect_ready = manifest
                .dependencies
                .iter()
                .all(|d| completed.contains(d));
            prop_assert_eq!(
                ready.contains(id),
                expect_ready,
                "readiness mismatch for {}",
                id
            );
        }
    }
}
