// src/ports/worker.rs

//! Worker-execution port.
//!
//! A worker runner launches one agent process (container or local
//! subprocess) per task attempt, and can reattach to attempts left running
//! by a previous orchestrator process. Worker-side results (usage,
//! checkpoints, changed files) are synced from a `result.json` in the
//! attempt's logs directory after the attempt finishes; the runner result
//! itself stays minimal.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::Result;

/// Everything a runner needs to launch one attempt.
#[derive(Debug, Clone)]
pub struct TaskAttemptRequest {
    pub task_id: String,
    pub attempt: u32,
    /// Worktree the worker operates in.
    pub workspace: PathBuf,
    /// Directory for worker logs and the `result.json` sync file.
    pub logs_dir: PathBuf,
    /// Per-task "home" directory holding the attempt's worker config.
    pub home_dir: PathBuf,
    pub branch: String,
    /// Per-task doctor command the worker self-verifies with.
    pub doctor_command: String,
    pub retry_limit: u32,
    pub checkpoint: bool,
    /// Mock mode: no credentials are exposed to the worker.
    pub mock: bool,
}

/// Request to reattach to a previously started attempt.
#[derive(Debug, Clone)]
pub struct TaskResumeRequest {
    pub task_id: String,
    pub container_id_hint: Option<String>,
    pub logs_dir: PathBuf,
}

/// Result of an attempt (or reattachment).
#[derive(Debug, Clone, Default)]
pub struct WorkerRunnerResult {
    pub success: bool,

    /// Container/process handle for later cleanup or reattachment.
    pub container_id: Option<String>,

    /// Reattachment found no live process; the task should go back to
    /// `pending` and be reclaimed by the scheduler.
    pub reset_to_pending: bool,

    pub error_message: Option<String>,
}

/// Outcome of [`WorkerRunner::stop`].
#[derive(Debug, Clone, Default)]
pub struct StopOutcome {
    pub stopped: Vec<String>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait WorkerRunner: Send + Sync {
    /// One-shot run-start bootstrap (e.g. build the worker image).
    async fn prepare(&self, build_image: bool) -> Result<()>;

    async fn run_attempt(&self, request: TaskAttemptRequest) -> Result<WorkerRunnerResult>;

    async fn resume_attempt(&self, request: TaskResumeRequest) -> Result<WorkerRunnerResult>;

    async fn cleanup_task(&self, task_id: &str, container_id_hint: Option<&str>) -> Result<()>;

    /// Request shutdown of active workers. `stop_containers` controls
    /// whether running containers are terminated or left running.
    async fn stop(&self, stop_containers: bool) -> Result<StopOutcome>;
}
