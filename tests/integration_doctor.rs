// tests/integration_doctor.rs

//! Batch-level failure paths: integration doctor failure, merge conflicts,
//! blocking validators, and budget blocks.

mod common;

use common::{TaskSpecBuilder, TestEnv};
use swarmdag::ports::validator::ValidatorKind;
use swarmdag::state::model::{BatchStatus, RunStatus, TaskStatus};
use swarmdag_test_utils::builders::CatalogBuilder;
use swarmdag_test_utils::with_timeout;

fn two_writers() -> CatalogBuilder {
    CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("alpha").writes("r1"))
        .with_task(TaskSpecBuilder::new("beta").writes("r2"))
}

#[tokio::test]
async fn integration_doctor_failure_fails_batch_and_run() {
    let env = TestEnv::new(two_writers(), |c| c.max_parallel(2));
    env.validators.fail_kind(ValidatorKind::Doctor);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);

    let state = env.load_state("run-1");
    let batch = &state.batches[0];
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.integration_doctor_passed, Some(false));
    assert!(batch.merge_commit.is_some(), "merge happened before doctor");

    for id in ["alpha", "beta"] {
        assert_eq!(
            state.task(id).unwrap().status,
            TaskStatus::NeedsHumanReview
        );
    }

    // No ledger entry may exist for a doctor-failed batch.
    assert!(env.ledger().is_none());
    assert!(env.events.has("doctor.integration.fail"));
    assert!(env.events.has("run.stop"));
}

#[tokio::test]
async fn merge_conflict_parks_validated_tasks_for_review() {
    let env = TestEnv::new(two_writers(), |c| c.max_parallel(2));
    env.vcs.conflict_on("swarm/beta");

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);

    let state = env.load_state("run-1");
    assert_eq!(state.batches[0].status, BatchStatus::Failed);

    for id in ["alpha", "beta"] {
        let task = state.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::NeedsHumanReview);
        assert!(
            task.human_review.as_deref().unwrap().contains("conflict"),
            "review reason mentions the conflict"
        );
    }

    assert!(env.events.has("batch.merge_conflict"));
    assert!(env.ledger().is_none());
}

#[tokio::test]
async fn blocking_validator_excludes_task_from_merge() {
    let env = TestEnv::new(two_writers(), |c| {
        c.max_parallel(2).validator("test", "cargo test")
    });
    env.validators.fail_kind(ValidatorKind::Test);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();

    let state = env.load_state("run-1");
    for id in ["alpha", "beta"] {
        assert_eq!(
            state.task(id).unwrap().status,
            TaskStatus::NeedsHumanReview
        );
        let recorded = &state.task(id).unwrap().validator_results;
        assert!(!recorded.get("test").unwrap().pass);
    }
    // Nothing validated, so nothing merged and no stop reason.
    assert!(env.vcs.merged_branches().is_empty());
    assert_eq!(result.status, RunStatus::Paused);
    assert!(env.events.has("validator.block"));
}

#[tokio::test]
async fn warn_mode_validator_records_but_does_not_block() {
    let env = TestEnv::new(two_writers(), |c| {
        c.max_parallel(2)
            .validator("test", "cargo test")
            .validator("mode", "warn")
    });
    env.validators.fail_kind(ValidatorKind::Test);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);

    let state = env.load_state("run-1");
    for id in ["alpha", "beta"] {
        let task = state.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(!task.validator_results.get("test").unwrap().pass);
    }
}

#[tokio::test]
async fn budget_block_stops_after_the_breaching_batch() {
    // Lock conflict forces two batches; the first breaches the run budget.
    let catalog = CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("first").writes("shared"))
        .with_task(TaskSpecBuilder::new("second").reads("shared"));
    let env = TestEnv::new(catalog, |c| {
        c.max_parallel(2)
            .budget("max_tokens_per_run", "500")
            .budget("mode", "\"block\"")
    });
    env.worker.succeed_with("first", 1000, &[]);
    env.worker.succeed_with("second", 1000, &[]);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Paused);

    let state = env.load_state("run-1");
    assert_eq!(state.batches.len(), 1);
    // The breaching batch still lands its validated work.
    assert_eq!(state.task("first").unwrap().status, TaskStatus::Complete);
    assert_eq!(state.task("second").unwrap().status, TaskStatus::Pending);
    assert!(env.events.has("budget.block"));
}
