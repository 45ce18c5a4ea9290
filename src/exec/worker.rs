// src/exec/worker.rs

//! Local subprocess worker runner.
//!
//! Each attempt runs the configured worker command as `sh -c` inside the
//! task's worktree, with the attempt context exported through `SWARM_*`
//! environment variables. The worker writes its sync file
//! (`result.json`) into `SWARM_LOGS_DIR` before exiting.
//!
//! Local processes do not survive the orchestrator, so `resume_attempt`
//! from a fresh process always reports `reset_to_pending`; the scheduler
//! then reclaims the task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, SwarmdagError};
use crate::ports::worker::{
    StopOutcome, TaskAttemptRequest, TaskResumeRequest, WorkerRunner, WorkerRunnerResult,
};

/// Runs worker attempts as local subprocesses.
pub struct LocalWorkerRunner {
    command: String,
    /// task id -> pid of the live attempt, for stop/cleanup bookkeeping.
    active: Arc<Mutex<HashMap<String, u32>>>,
    shutdown: CancellationToken,
}

impl LocalWorkerRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl WorkerRunner for LocalWorkerRunner {
    async fn prepare(&self, build_image: bool) -> Result<()> {
        // Local workers have no image to build.
        if build_image {
            debug!("build_image requested; local runner has nothing to build");
        }
        Ok(())
    }

    async fn run_attempt(&self, request: TaskAttemptRequest) -> Result<WorkerRunnerResult> {
        info!(
            task = %request.task_id,
            attempt = request.attempt,
            cmd = %self.command,
            "starting worker process"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&request.workspace)
            .env("SWARM_TASK_ID", &request.task_id)
            .env("SWARM_ATTEMPT", request.attempt.to_string())
            .env("SWARM_BRANCH", &request.branch)
            .env("SWARM_WORKSPACE", &request.workspace)
            .env("SWARM_LOGS_DIR", &request.logs_dir)
            .env("SWARM_HOME_DIR", &request.home_dir)
            .env("SWARM_DOCTOR_CMD", &request.doctor_command)
            .env("SWARM_RETRY_LIMIT", request.retry_limit.to_string())
            .env("SWARM_CHECKPOINT", request.checkpoint.to_string())
            .env("SWARM_MOCK", request.mock.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SwarmdagError::WorkerError(format!(
                "spawning worker for task '{}': {}",
                request.task_id, e
            ))
        })?;

        let pid = child.id().unwrap_or(0);
        let container_id = format!("local-{pid}");
        self.active
            .lock()
            .unwrap()
            .insert(request.task_id.clone(), pid);

        // Drain both pipes so the worker never blocks on a full buffer.
        if let Some(stdout) = child.stdout.take() {
            let task_id = request.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task_id, "worker stdout: {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let task_id = request.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task_id, "worker stderr: {}", line);
                }
            });
        }

        // Either the worker exits on its own, or a stop request terminates it.
        let result = tokio::select! {
            status_res = child.wait() => {
                let status = status_res.map_err(|e| {
                    SwarmdagError::WorkerError(format!(
                        "waiting for worker of task '{}': {}",
                        request.task_id, e
                    ))
                })?;
                let code = status.code().unwrap_or(-1);
                info!(
                    task = %request.task_id,
                    exit_code = code,
                    success = status.success(),
                    "worker process exited"
                );
                WorkerRunnerResult {
                    success: status.success(),
                    container_id: Some(container_id),
                    reset_to_pending: false,
                    error_message: (!status.success())
                        .then(|| format!("worker exited with code {code}")),
                }
            }
            _ = self.shutdown.cancelled() => {
                warn!(task = %request.task_id, "stop requested; killing worker process");
                let _ = child.kill().await;
                WorkerRunnerResult {
                    success: false,
                    container_id: Some(container_id),
                    reset_to_pending: true,
                    error_message: Some("worker stopped by shutdown request".to_string()),
                }
            }
        };

        self.active.lock().unwrap().remove(&request.task_id);
        Ok(result)
    }

    async fn resume_attempt(&self, request: TaskResumeRequest) -> Result<WorkerRunnerResult> {
        // Attempts from a previous orchestrator process are gone; attempts
        // from this process are still tracked in `active`.
        let alive = self
            .active
            .lock()
            .unwrap()
            .contains_key(&request.task_id);
        if alive {
            // The attempt future itself will deliver the real result; a
            // reattach request on a live local process is a no-op success.
            return Ok(WorkerRunnerResult {
                success: true,
                container_id: request.container_id_hint,
                reset_to_pending: false,
                error_message: None,
            });
        }

        debug!(task = %request.task_id, "no live worker process to reattach");
        Ok(WorkerRunnerResult {
            success: false,
            container_id: None,
            reset_to_pending: true,
            error_message: Some("worker process not found".to_string()),
        })
    }

    async fn cleanup_task(&self, task_id: &str, _container_id_hint: Option<&str>) -> Result<()> {
        self.active.lock().unwrap().remove(task_id);
        Ok(())
    }

    async fn stop(&self, stop_containers: bool) -> Result<StopOutcome> {
        let mut outcome = StopOutcome::default();
        if stop_containers {
            let active = self.active.lock().unwrap().clone();
            self.shutdown.cancel();
            outcome.stopped = active.keys().cloned().collect();
        }
        Ok(outcome)
    }
}
