// tests/rescope_loop.rs

//! Compliance enforcement: out-of-scope changes trigger a rescope that
//! widens the manifest and re-runs the task with honest locks.

mod common;

use common::{TaskSpecBuilder, TestEnv};
use swarmdag::state::model::{RunStatus, TaskStatus};
use swarmdag_test_utils::builders::CatalogBuilder;
use swarmdag_test_utils::with_timeout;

fn enforcing(c: swarmdag_test_utils::builders::ConfigBuilder) -> swarmdag_test_utils::builders::ConfigBuilder {
    c.scope_mode("enforce")
        .manifest_policy("block")
        .resource("db", &["migrations/**"])
        .resource("api", &["src/api/**"])
}

#[tokio::test]
async fn out_of_scope_write_rescopes_and_reruns() {
    let catalog = CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("feature").writes("db"));
    let env = TestEnv::new(catalog, enforcing);

    // The worker touches api-owned files the manifest never declared.
    env.worker
        .succeed_with("feature", 50, &["src/api/handler.rs"]);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);

    let state = env.load_state("run-1");
    let task = state.task("feature").unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.attempts, 2, "rescope forced a second attempt");

    // Two batches: the rescoped attempt went through the scheduler again.
    assert_eq!(state.batches.len(), 2);

    // The on-disk manifest now carries the widened lock.
    let manifest = std::fs::read_to_string(env.manifest_path("feature")).unwrap();
    assert!(manifest.contains("api"), "manifest gained the api write lock");

    for event in [
        "manifest.compliance.block",
        "access.requested",
        "task.rescope.start",
        "task.rescope.updated",
        "manifest.compliance.pass",
    ] {
        assert!(env.events.has(event), "missing event {event}");
    }
}

#[tokio::test]
async fn impossible_rescope_parks_the_task() {
    // Widening would add a write on a resource the task declares as a
    // read, which is invalid; the task must park in rescope_required.
    let catalog = CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("feature").reads("api").writes("db"));
    let env = TestEnv::new(catalog, enforcing);
    env.worker
        .succeed_with("feature", 50, &["src/api/handler.rs"]);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Paused);

    let state = env.load_state("run-1");
    assert_eq!(
        state.task("feature").unwrap().status,
        TaskStatus::RescopeRequired
    );
    assert!(env.events.has("task.rescope.failed"));
}

#[tokio::test]
async fn warn_policy_records_violations_without_rescope() {
    let catalog = CatalogBuilder::new()
        .with_task(TaskSpecBuilder::new("feature").writes("db"));
    let env = TestEnv::new(catalog, |c| {
        c.scope_mode("observe")
            .manifest_policy("warn")
            .resource("api", &["src/api/**"])
    });
    env.worker
        .succeed_with("feature", 50, &["src/api/handler.rs"]);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);

    let state = env.load_state("run-1");
    let task = state.task("feature").unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.attempts, 1);
    assert!(env.events.has("manifest.compliance.warn"));
    assert!(!env.events.has("task.rescope.start"));
}

#[tokio::test]
async fn declared_file_write_patterns_cover_changes() {
    let catalog = CatalogBuilder::new().with_task(
        TaskSpecBuilder::new("feature")
            .writes("db")
            .file_write("docs/**"),
    );
    let env = TestEnv::new(catalog, enforcing);
    env.worker.succeed_with("feature", 50, &["docs/notes.md"]);

    let result = with_timeout(env.run_to_end("run-1")).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(env.load_state("run-1").task("feature").unwrap().attempts, 1);
    assert!(env.events.has("manifest.compliance.pass"));
}
