// src/state/transitions.rs

//! Typed transitions: the only write API over [`RunState`].
//!
//! Each function names one mutation, enforces the status machine, refreshes
//! `updated_at`, and leaves the document ready to persist. Ad-hoc field
//! mutation from engine code is not allowed.
//!
//! Status machine:
//!
//! ```text
//! pending ──► running ──► validated ──► complete
//!                 │            │
//!                 ├──► needs_human_review ──► (operator) ──► pending | complete
//!                 ├──► rescope_required ──► pending
//!                 ├──► failed
//!                 └──► pending   (resume recovery / rescope reset)
//! pending ──► skipped           (dry-run)
//! pending ──► complete          (ledger reuse seeding)
//! validated ──► needs_human_review   (merge conflict / doctor failure)
//! validated ──► pending              (stopped before merge; re-run)
//! ```

use chrono::Utc;
use tracing::debug;

use crate::errors::{Result, SwarmdagError};
use crate::state::model::{
    BatchState, BatchStatus, ComputedLocks, RunState, RunStatus, TaskState, TaskStatus,
    UsageRecord, ValidatorResult,
};

/// Whether `from -> to` is a legal task transition.
fn transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match (from, to) {
        (Pending, Running) | (Pending, Skipped) | (Pending, Complete) => true,
        (Running, Validated)
        | (Running, NeedsHumanReview)
        | (Running, RescopeRequired)
        | (Running, Failed)
        | (Running, Pending) => true,
        (Validated, Complete) | (Validated, NeedsHumanReview) | (Validated, Pending) => true,
        (NeedsHumanReview, Pending) | (NeedsHumanReview, Complete) => true,
        (RescopeRequired, Pending) => true,
        _ => false,
    }
}

fn touch(state: &mut RunState) {
    state.updated_at = Utc::now();
}

fn task_mut<'a>(state: &'a mut RunState, task_id: &str) -> Result<&'a mut TaskState> {
    state
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| SwarmdagError::TaskNotFound(task_id.to_string()))
}

fn set_status(state: &mut RunState, task_id: &str, to: TaskStatus) -> Result<()> {
    let task = task_mut(state, task_id)?;
    let from = task.status;
    if !transition_allowed(from, to) {
        return Err(SwarmdagError::InvalidTransition {
            task: task_id.to_string(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    task.status = to;
    debug!(task = %task_id, from = from.as_str(), to = to.as_str(), "task transition");
    touch(state);
    Ok(())
}

/// Open a new batch and move its tasks to `running`.
///
/// The batch id must be strictly greater than every persisted batch id.
pub fn start_batch(
    state: &mut RunState,
    batch_id: u64,
    task_ids: &[String],
    locks: ComputedLocks,
) -> Result<()> {
    if let Some(max) = state.batches.iter().map(|b| b.batch_id).max() {
        if batch_id <= max {
            return Err(SwarmdagError::StateError(format!(
                "batch id {} is not monotonic (max persisted is {})",
                batch_id, max
            )));
        }
    }
    if state.running_batch().is_some() {
        return Err(SwarmdagError::StateError(
            "cannot start a batch while another batch is running".to_string(),
        ));
    }

    for id in task_ids {
        set_status(state, id, TaskStatus::Running)?;
        let task = task_mut(state, id)?;
        task.batch_id = Some(batch_id);
        task.attempts += 1;
        task.started_at = Some(Utc::now());
        task.completed_at = None;
        task.last_error = None;
    }

    state.batches.push(BatchState {
        batch_id,
        status: BatchStatus::Running,
        tasks: task_ids.to_vec(),
        locks,
        started_at: Utc::now(),
        completed_at: None,
        merge_commit: None,
        integration_doctor_passed: None,
    });
    touch(state);
    Ok(())
}

/// Close the running batch with a final status.
pub fn close_batch(
    state: &mut RunState,
    batch_id: u64,
    status: BatchStatus,
    merge_commit: Option<String>,
    integration_doctor_passed: Option<bool>,
) -> Result<()> {
    let batch = state
        .batches
        .iter_mut()
        .find(|b| b.batch_id == batch_id)
        .ok_or_else(|| {
            SwarmdagError::StateError(format!("cannot close unknown batch {}", batch_id))
        })?;

    if batch.status != BatchStatus::Running {
        return Err(SwarmdagError::StateError(format!(
            "batch {} is already closed",
            batch_id
        )));
    }
    if status == BatchStatus::Running {
        return Err(SwarmdagError::StateError(
            "close_batch requires a terminal status".to_string(),
        ));
    }

    batch.status = status;
    batch.completed_at = Some(Utc::now());
    batch.merge_commit = merge_commit;
    batch.integration_doctor_passed = integration_doctor_passed;
    touch(state);
    Ok(())
}

/// Record workspace/branch/logs assignment when an attempt starts.
pub fn record_task_attempt_start(
    state: &mut RunState,
    task_id: &str,
    branch: String,
    workspace: std::path::PathBuf,
    logs_dir: std::path::PathBuf,
) -> Result<()> {
    let task = task_mut(state, task_id)?;
    task.branch = Some(branch);
    task.workspace = Some(workspace);
    task.logs_dir = Some(logs_dir);
    touch(state);
    Ok(())
}

/// Record the worker-side container/thread handles for reattachment.
pub fn record_task_worker_handles(
    state: &mut RunState,
    task_id: &str,
    container_id: Option<String>,
    thread_id: Option<String>,
) -> Result<()> {
    let task = task_mut(state, task_id)?;
    if container_id.is_some() {
        task.container_id = container_id;
    }
    if thread_id.is_some() {
        task.thread_id = thread_id;
    }
    touch(state);
    Ok(())
}

/// Sync worker-emitted usage, checkpoints and changed files after an attempt.
pub fn record_task_usage(
    state: &mut RunState,
    task_id: &str,
    usage: UsageRecord,
    checkpoint_commits: &[String],
    changed_files: &[String],
) -> Result<()> {
    let task = task_mut(state, task_id)?;
    task.tokens_used += usage.tokens_used;
    task.estimated_cost += usage.estimated_cost;
    task.usage_by_attempt.push(usage);
    task.checkpoint_commits
        .extend(checkpoint_commits.iter().cloned());
    task.changed_files = changed_files.to_vec();

    state.tokens_used += usage.tokens_used;
    state.estimated_cost += usage.estimated_cost;
    touch(state);
    Ok(())
}

/// Mark a task failed with an error message.
pub fn mark_task_failed(state: &mut RunState, task_id: &str, message: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::Failed)?;
    let task = task_mut(state, task_id)?;
    task.last_error = Some(message.to_string());
    task.completed_at = Some(Utc::now());
    Ok(())
}

/// Reset a task to `pending` (resume recovery, rescope, operator release).
pub fn reset_task_to_pending(state: &mut RunState, task_id: &str, reason: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::Pending)?;
    let task = task_mut(state, task_id)?;
    task.batch_id = None;
    task.container_id = None;
    task.started_at = None;
    task.completed_at = None;
    task.last_error = Some(reason.to_string());
    Ok(())
}

/// Mark a task validated (all enabled validators passed).
pub fn mark_task_validated(state: &mut RunState, task_id: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::Validated)
}

/// Mark a task complete.
pub fn mark_task_complete(state: &mut RunState, task_id: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::Complete)?;
    let task = task_mut(state, task_id)?;
    task.completed_at = Some(Utc::now());
    Ok(())
}

/// Seed a pending task straight to `complete` from an eligible ledger entry.
pub fn seed_task_complete(state: &mut RunState, task_id: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::Complete)?;
    let task = task_mut(state, task_id)?;
    task.completed_at = Some(Utc::now());
    Ok(())
}

/// Mark a task skipped (dry-run).
pub fn mark_task_skipped(state: &mut RunState, task_id: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::Skipped)?;
    let task = task_mut(state, task_id)?;
    task.started_at = Some(Utc::now());
    task.completed_at = Some(Utc::now());
    Ok(())
}

/// Park a task for operator review.
pub fn mark_task_needs_review(state: &mut RunState, task_id: &str, reason: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::NeedsHumanReview)?;
    let task = task_mut(state, task_id)?;
    task.human_review = Some(reason.to_string());
    task.completed_at = Some(Utc::now());
    Ok(())
}

/// Park a task whose rescope plan could not be computed.
pub fn mark_task_rescope_required(state: &mut RunState, task_id: &str, reason: &str) -> Result<()> {
    set_status(state, task_id, TaskStatus::RescopeRequired)?;
    let task = task_mut(state, task_id)?;
    task.last_error = Some(reason.to_string());
    Ok(())
}

/// Record a validator result on the task (last write per kind wins).
pub fn record_validator_result(
    state: &mut RunState,
    task_id: &str,
    result: ValidatorResult,
) -> Result<()> {
    let task = task_mut(state, task_id)?;
    task.validator_results.insert(result.kind.clone(), result);
    touch(state);
    Ok(())
}

/// Set the run-level status.
pub fn set_run_status(state: &mut RunState, status: RunStatus) {
    state.status = status;
    touch(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn two_task_state() -> RunState {
        RunState::new(
            "run-1",
            "demo",
            PathBuf::from("/repo"),
            "main",
            ["a".to_string(), "b".to_string()],
        )
    }

    #[test]
    fn batch_ids_must_be_monotonic() {
        let mut state = two_task_state();
        start_batch(&mut state, 1, &["a".to_string()], ComputedLocks::default()).unwrap();
        close_batch(&mut state, 1, BatchStatus::Complete, None, None).unwrap();
        let err = start_batch(&mut state, 1, &["b".to_string()], ComputedLocks::default());
        assert!(err.is_err());
        start_batch(&mut state, 2, &["b".to_string()], ComputedLocks::default()).unwrap();
    }

    #[test]
    fn only_one_batch_runs_at_a_time() {
        let mut state = two_task_state();
        start_batch(&mut state, 1, &["a".to_string()], ComputedLocks::default()).unwrap();
        assert!(start_batch(&mut state, 2, &["b".to_string()], ComputedLocks::default()).is_err());
    }

    #[test]
    fn complete_is_terminal() {
        let mut state = two_task_state();
        start_batch(&mut state, 1, &["a".to_string()], ComputedLocks::default()).unwrap();
        mark_task_validated(&mut state, "a").unwrap();
        mark_task_complete(&mut state, "a").unwrap();
        assert!(matches!(
            reset_task_to_pending(&mut state, "a", "nope"),
            Err(SwarmdagError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn running_can_reset_to_pending() {
        let mut state = two_task_state();
        start_batch(&mut state, 1, &["a".to_string()], ComputedLocks::default()).unwrap();
        reset_task_to_pending(&mut state, "a", "reattach failed").unwrap();
        let task = state.task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.batch_id.is_none());
        assert_eq!(task.attempts, 1);
    }

    #[test]
    fn validated_can_park_for_review() {
        let mut state = two_task_state();
        start_batch(&mut state, 1, &["a".to_string()], ComputedLocks::default()).unwrap();
        mark_task_validated(&mut state, "a").unwrap();
        mark_task_needs_review(&mut state, "a", "merge conflict in batch 1").unwrap();
        assert_eq!(
            state.task("a").unwrap().status,
            TaskStatus::NeedsHumanReview
        );
    }

    #[test]
    fn usage_aggregates_at_task_and_run_level() {
        let mut state = two_task_state();
        start_batch(&mut state, 1, &["a".to_string()], ComputedLocks::default()).unwrap();
        record_task_usage(
            &mut state,
            "a",
            UsageRecord {
                attempt: 1,
                tokens_used: 100,
                estimated_cost: 0.5,
            },
            &["abc123".to_string()],
            &["src/lib.rs".to_string()],
        )
        .unwrap();
        assert_eq!(state.tokens_used, 100);
        assert_eq!(state.task("a").unwrap().tokens_used, 100);
        assert_eq!(state.task("a").unwrap().checkpoint_commits.len(), 1);
    }
}
