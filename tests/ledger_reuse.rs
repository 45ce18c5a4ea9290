// tests/ledger_reuse.rs

//! Cross-run reuse: a completed task whose ledger entry is reachable from
//! HEAD and fingerprint-stable is seeded complete without a worker; stale
//! or unreachable entries are ignored.

mod common;

use chrono::Utc;
use common::{TaskSpecBuilder, TestEnv};
use swarmdag::ledger::model::{LedgerEntry, LedgerEntryStatus};
use swarmdag::ledger::store::LedgerStore;
use swarmdag::state::model::{RunStatus, TaskStatus};
use swarmdag_test_utils::builders::CatalogBuilder;
use swarmdag_test_utils::with_timeout;

fn solo_catalog() -> CatalogBuilder {
    CatalogBuilder::new().with_task(TaskSpecBuilder::new("solo").writes("r1"))
}

#[tokio::test]
async fn second_run_seeds_completed_task_from_ledger() {
    let env = TestEnv::new(solo_catalog(), |c| c.reuse(true));

    with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(env.worker.launched(), vec!["solo".to_string()]);
    let entry_commit = env.ledger().unwrap().get("solo").unwrap().merge_commit.clone();

    // Same repo, same files, HEAD has advanced past the merge commit.
    let result = with_timeout(env.run_to_end("run-2")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);

    // No second worker launch: the task was seeded.
    assert_eq!(env.worker.launched(), vec!["solo".to_string()]);
    assert!(env.events.has("task.seeded_complete"));

    let state = env.load_state("run-2");
    assert_eq!(state.task("solo").unwrap().status, TaskStatus::Complete);
    assert!(state.batches.is_empty(), "no batch needed");

    // The original entry is untouched.
    let entry = env.ledger().unwrap().get("solo").unwrap().clone();
    assert_eq!(entry.merge_commit, entry_commit);
}

#[tokio::test]
async fn unreachable_merge_commit_is_never_reused() {
    let env = TestEnv::new(solo_catalog(), |c| c.reuse(true));
    with_timeout(env.run_to_end("run-1")).await.unwrap();

    // Rewrite the entry to point at a commit HEAD cannot reach.
    let store = LedgerStore::new(env.paths("probe").project_dir());
    let mut entry = store.load().unwrap().unwrap().get("solo").unwrap().clone();
    entry.merge_commit = "rebased-away".to_string();
    store.upsert(entry).unwrap();

    with_timeout(env.run_to_end("run-2")).await.unwrap();

    // The task ran again instead of being seeded.
    assert_eq!(
        env.worker.launched(),
        vec!["solo".to_string(), "solo".to_string()]
    );
    assert_eq!(env.events.count("task.seeded_complete"), 0);
}

#[tokio::test]
async fn changed_task_files_invalidate_the_fingerprint() {
    let env = TestEnv::new(solo_catalog(), |c| c.reuse(true));
    with_timeout(env.run_to_end("run-1")).await.unwrap();

    // Edit the spec on disk; the recorded fingerprint goes stale.
    let spec_path = env.catalog_dir.path().join("solo").join("spec.md");
    std::fs::write(&spec_path, "# solo\n\nDo a different thing.\n").unwrap();

    with_timeout(env.run_to_end("run-2")).await.unwrap();

    assert_eq!(env.worker.launched().len(), 2, "task re-ran");
    assert_eq!(env.events.count("task.seeded_complete"), 0);
}

#[tokio::test]
async fn reuse_off_ignores_the_ledger() {
    let env = TestEnv::new(solo_catalog(), |c| c.reuse(false));
    with_timeout(env.run_to_end("run-1")).await.unwrap();
    with_timeout(env.run_to_end("run-2")).await.unwrap();

    assert_eq!(env.worker.launched().len(), 2);
    assert_eq!(env.events.count("task.seeded_complete"), 0);
}

#[tokio::test]
async fn external_dependency_satisfied_from_ledger() {
    // "consumer" depends on "provider", which is not in this run's catalog
    // but has an eligible ledger entry.
    let catalog = CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("consumer").dep("provider").writes("r1"));
    let env = TestEnv::new(catalog, |c| c.reuse(true));

    env.vcs.mark_reachable("provider-merge");
    let store = LedgerStore::new(env.paths("probe").project_dir());
    store
        .upsert(LedgerEntry {
            task_id: "provider".to_string(),
            status: LedgerEntryStatus::Complete,
            fingerprint: "external-fp".to_string(),
            merge_commit: "provider-merge".to_string(),
            integration_doctor_passed: true,
            completed_at: Utc::now(),
            run_id: "run-0".to_string(),
            source: "executor".to_string(),
            updated_at: Utc::now(),
        })
        .unwrap();

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);
    assert!(env.events.has("deps.external_satisfied"));

    let state = env.load_state("run-1");
    assert_eq!(state.task("consumer").unwrap().status, TaskStatus::Complete);
    // The external dependency never materializes as a task in RunState.
    assert!(state.task("provider").is_none());
}

#[tokio::test]
async fn missing_external_dependency_fails_the_run() {
    let catalog = CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("consumer").dep("nowhere"));
    let env = TestEnv::new(catalog, |c| c.reuse(true));

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert!(env.events.has("run.blocked"));
}
