// src/state/model.rs

//! The `RunState` document and its sub-records.
//!
//! `RunState` is owned exclusively by the run engine for the duration of a
//! run and written through [`crate::state::store::StateStore`]. All fields
//! are serde-serialized to `state.json`; mutation happens only via
//! [`crate::state::transitions`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk schema version; `load` rejects anything else.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Status of the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Complete,
    Failed,
}

/// Status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Validated,
    Complete,
    Failed,
    NeedsHumanReview,
    RescopeRequired,
    Skipped,
}

impl TaskStatus {
    /// Blocked statuses require operator attention before the task can make
    /// progress again.
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::NeedsHumanReview | TaskStatus::RescopeRequired
        )
    }

    /// Terminal-success statuses count towards dependency satisfaction.
    pub fn is_satisfied(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Validated => "validated",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::NeedsHumanReview => "needs_human_review",
            TaskStatus::RescopeRequired => "rescope_required",
            TaskStatus::Skipped => "skipped",
        }
    }
}

/// Status of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Complete,
    Failed,
}

/// Result of one validator invocation against a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub kind: String,
    pub pass: bool,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

/// Token/cost usage reported by one worker attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub attempt: u32,
    pub tokens_used: u64,
    pub estimated_cost: f64,
}

/// Per-task mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Worker checkpoint commits, in attempt order.
    #[serde(default)]
    pub checkpoint_commits: Vec<String>,

    /// One result per validator kind; last write wins.
    #[serde(default)]
    pub validator_results: BTreeMap<String, ValidatorResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_review: Option<String>,

    #[serde(default)]
    pub tokens_used: u64,

    #[serde(default)]
    pub estimated_cost: f64,

    #[serde(default)]
    pub usage_by_attempt: Vec<UsageRecord>,

    /// Files the worker reported changing in the last finished attempt.
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl TaskState {
    pub fn new_pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            batch_id: None,
            branch: None,
            workspace: None,
            logs_dir: None,
            container_id: None,
            thread_id: None,
            started_at: None,
            completed_at: None,
            last_error: None,
            checkpoint_commits: Vec::new(),
            validator_results: BTreeMap::new(),
            human_review: None,
            tokens_used: 0,
            estimated_cost: 0.0,
            usage_by_attempt: Vec::new(),
            changed_files: Vec::new(),
        }
    }
}

/// The lock set computed for a batch at scheduling time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedLocks {
    #[serde(default)]
    pub reads: BTreeSet<String>,

    #[serde(default)]
    pub writes: BTreeSet<String>,
}

/// One batch of co-scheduled tasks. Append-only in `RunState::batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: u64,
    pub status: BatchStatus,

    /// Ordered task ids admitted into this batch.
    pub tasks: Vec<String>,

    pub locks: ComputedLocks,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_commit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_doctor_passed: Option<bool>,
}

/// Control-plane snapshot pinned at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneSnapshot {
    pub base_sha: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    pub pinned_at: DateTime<Utc>,
}

/// The central persistent document for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub run_id: String,
    pub project: String,
    pub repo_path: PathBuf,
    pub main_branch: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub tasks: BTreeMap<String, TaskState>,

    #[serde(default)]
    pub batches: Vec<BatchState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneSnapshot>,

    #[serde(default)]
    pub tokens_used: u64,

    #[serde(default)]
    pub estimated_cost: f64,
}

impl RunState {
    /// Fresh state for a new run: every catalog task starts `pending`.
    pub fn new(
        run_id: impl Into<String>,
        project: impl Into<String>,
        repo_path: PathBuf,
        main_branch: impl Into<String>,
        task_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let now = Utc::now();
        let tasks = task_ids
            .into_iter()
            .map(|id| (id, TaskState::new_pending()))
            .collect();

        Self {
            schema_version: STATE_SCHEMA_VERSION,
            run_id: run_id.into(),
            project: project.into(),
            repo_path,
            main_branch: main_branch.into(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            tasks,
            batches: Vec::new(),
            control_plane: None,
            tokens_used: 0,
            estimated_cost: 0.0,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskState> {
        self.tasks.get(id)
    }

    /// Ids of tasks currently in the given status, in id order.
    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of tasks in a blocked status, in id order.
    pub fn blocked_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.status.is_blocked())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids whose status satisfies dependencies (`complete` or `skipped`).
    pub fn completed_task_ids(&self) -> BTreeSet<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.status.is_satisfied())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The batch currently marked `running`, if any.
    pub fn running_batch(&self) -> Option<&BatchState> {
        self.batches
            .iter()
            .find(|b| b.status == BatchStatus::Running)
    }

    /// Next monotonic batch id (max persisted + 1, starting at 1).
    pub fn next_batch_id(&self) -> u64 {
        self.batches.iter().map(|b| b.batch_id).max().unwrap_or(0) + 1
    }

    /// Count of tasks in a terminal-success status, used by the doctor
    /// validator cadence.
    pub fn finished_task_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status.is_satisfied())
            .count()
    }
}
