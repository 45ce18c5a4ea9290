// tests/run_happy_path.rs

//! Two independent writers share one batch, merge cleanly, pass the
//! integration doctor, and land in the ledger with the same merge commit.

mod common;

use common::{TaskSpecBuilder, TestEnv};
use swarmdag::state::model::{BatchStatus, RunStatus, TaskStatus};
use swarmdag_test_utils::builders::CatalogBuilder;
use swarmdag_test_utils::with_timeout;

fn two_writers() -> CatalogBuilder {
    CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("alpha").writes("r1"))
        .with_task(TaskSpecBuilder::new("beta").writes("r2"))
}

#[tokio::test]
async fn two_parallel_tasks_complete_in_one_batch() {
    let env = TestEnv::new(two_writers(), |c| c.max_parallel(2));
    env.worker.succeed_with("alpha", 100, &["src/a.rs"]);
    env.worker.succeed_with("beta", 200, &["src/b.rs"]);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);
    assert!(result.stopped.is_none());

    let state = env.load_state("run-1");
    assert_eq!(state.status, RunStatus::Complete);
    assert_eq!(state.batches.len(), 1);

    let batch = &state.batches[0];
    assert_eq!(batch.batch_id, 1);
    assert_eq!(batch.status, BatchStatus::Complete);
    assert_eq!(batch.tasks.len(), 2);
    assert_eq!(batch.integration_doctor_passed, Some(true));
    let merge_commit = batch.merge_commit.clone().expect("merge commit");

    for id in ["alpha", "beta"] {
        let task = state.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempts, 1);
        assert!(task.completed_at.is_some());
    }

    // Usage synced from the worker result files.
    assert_eq!(state.tokens_used, 300);
    assert_eq!(state.task("alpha").unwrap().tokens_used, 100);

    // Both ledger entries carry the batch's merge commit.
    let ledger = env.ledger().expect("ledger written");
    assert_eq!(ledger.len(), 2);
    for id in ["alpha", "beta"] {
        let entry = ledger.get(id).unwrap();
        assert_eq!(entry.merge_commit, merge_commit);
        assert!(entry.integration_doctor_passed);
        assert_eq!(entry.source, "executor");
    }

    for event in [
        "run.start",
        "run.tasks_loaded",
        "batch.start",
        "batch.merging",
        "task.complete",
        "ledger.write.complete",
        "batch.complete",
        "run.complete",
        "run.summary",
    ] {
        assert!(env.events.has(event), "missing event {event}");
    }
}

#[tokio::test]
async fn dry_run_skips_every_task_without_workers() {
    let env = TestEnv::new(two_writers(), |c| c.max_parallel(2));

    let ctx = env.ctx_with("run-dry", true);
    let engine = swarmdag::engine::run::RunEngine::prepare(
        ctx,
        env.services(),
        env.stop.clone(),
        false,
    )
    .await
    .unwrap();
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert!(env.worker.launched().is_empty());
    assert!(env.events.has("batch.dry_run"));

    let state = env.load_state("run-dry");
    for id in ["alpha", "beta"] {
        assert_eq!(state.task(id).unwrap().status, TaskStatus::Skipped);
    }
    assert!(state.batches.iter().all(|b| b.status == BatchStatus::Complete));
    // Nothing merged, nothing for the ledger.
    assert!(env.ledger().is_none());
}

#[tokio::test]
async fn summary_report_is_written_at_run_end() {
    let env = TestEnv::new(two_writers(), |c| c.max_parallel(2));
    with_timeout(env.run_to_end("run-sum")).await.unwrap();

    let summary_path = env.paths("run-sum").summary_path();
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(summary["status"], "complete");
    assert_eq!(summary["tasks"].as_array().unwrap().len(), 2);
    assert_eq!(summary["batches"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dirty_working_tree_refuses_to_start() {
    let env = TestEnv::new(two_writers(), |c| c);
    env.vcs.set_dirty();
    let err = env.run_to_end("run-dirty").await;
    assert!(err.is_err());
}
