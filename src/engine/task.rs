// src/engine/task.rs

//! Single task attempts.
//!
//! The task engine prepares a worktree, stages the task's catalog files and
//! worker config, launches the attempt through the worker runner, and syncs
//! worker-emitted state (usage, checkpoints, changed files) back out of the
//! attempt's logs directory. It never mutates `RunState`; outcomes flow
//! back to the run engine as values.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::engine::{RunContext, Services};
use crate::errors::Result;
use crate::manifest::model::TaskManifest;
use crate::ports::worker::{TaskAttemptRequest, TaskResumeRequest, WorkerRunnerResult};
use crate::sched::locks::TaskLocks;
use crate::state::model::UsageRecord;

/// Worker-emitted state read from `<logs_dir>/result.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerSync {
    #[serde(default)]
    pub tokens_used: u64,

    #[serde(default)]
    pub estimated_cost: f64,

    #[serde(default)]
    pub checkpoint_commits: Vec<String>,

    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl WorkerSync {
    pub fn usage(&self, attempt: u32) -> UsageRecord {
        UsageRecord {
            attempt,
            tokens_used: self.tokens_used,
            estimated_cost: self.estimated_cost,
        }
    }
}

/// What one attempt (or reattachment) produced.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub task_id: String,
    pub attempt: u32,
    pub result: WorkerRunnerResult,
    pub sync: Option<WorkerSync>,
}

/// Launches and reattaches task attempts.
pub struct TaskEngine {
    ctx: Arc<RunContext>,
    services: Services,
}

impl TaskEngine {
    pub fn new(ctx: Arc<RunContext>, services: Services) -> Self {
        Self { ctx, services }
    }

    /// Branch a task's work lands on.
    pub fn branch_name(task_id: &str) -> String {
        format!("swarm/{task_id}")
    }

    /// Run one attempt end to end.
    ///
    /// Internal failures are folded into a failed [`WorkerRunnerResult`]
    /// rather than escaping: the batch engine decides what a failed attempt
    /// means for the task.
    pub async fn run_attempt(
        &self,
        manifest: &TaskManifest,
        attempt: u32,
        base_sha: &str,
    ) -> AttemptOutcome {
        let task_id = manifest.id.clone();
        match self.run_attempt_inner(manifest, attempt, base_sha).await {
            Ok(result) => {
                let sync = self.sync_worker_state(&task_id);
                AttemptOutcome {
                    task_id,
                    attempt,
                    result,
                    sync,
                }
            }
            Err(err) => {
                error!(task = %task_id, attempt, error = %err, "task attempt error");
                AttemptOutcome {
                    task_id,
                    attempt,
                    result: WorkerRunnerResult {
                        success: false,
                        error_message: Some(err.to_string()),
                        ..Default::default()
                    },
                    sync: None,
                }
            }
        }
    }

    async fn run_attempt_inner(
        &self,
        manifest: &TaskManifest,
        attempt: u32,
        base_sha: &str,
    ) -> Result<WorkerRunnerResult> {
        let task_id = &manifest.id;
        let workspace = self.ctx.paths.worktree_dir(task_id);
        let logs_dir = self.ctx.paths.task_logs_dir(task_id);
        let home_dir = self.ctx.paths.task_home_dir(task_id);
        let branch = Self::branch_name(task_id);

        fs::create_dir_all(&logs_dir)?;
        fs::create_dir_all(&home_dir)?;

        info!(task = %task_id, attempt, branch = %branch, "preparing task worktree");
        self.services
            .vcs
            .prepare_worktree(self.ctx.paths.repo_path(), &workspace, &branch, base_sha)
            .await?;

        self.stage_task_files(task_id, &workspace)?;
        self.write_worker_config(manifest, attempt, &home_dir)?;

        let doctor_command = if manifest.verify.doctor.trim().is_empty() {
            self.ctx.config.doctor.command.clone()
        } else {
            manifest.verify.doctor.clone()
        };

        let request = TaskAttemptRequest {
            task_id: task_id.clone(),
            attempt,
            workspace,
            logs_dir,
            home_dir,
            branch,
            doctor_command,
            retry_limit: self.ctx.config.worker.retry_limit,
            checkpoint: self.ctx.config.worker.checkpoint,
            mock: self.ctx.config.worker.mock,
        };

        self.services.worker.run_attempt(request).await
    }

    /// Reattach to an attempt left running by a previous process.
    ///
    /// A missing process comes back as `reset_to_pending`, and the run
    /// engine reclaims the task.
    pub async fn resume_running_task(
        &self,
        task_id: &str,
        container_id_hint: Option<String>,
    ) -> AttemptOutcome {
        let logs_dir = self.ctx.paths.task_logs_dir(task_id);
        let request = TaskResumeRequest {
            task_id: task_id.to_string(),
            container_id_hint,
            logs_dir,
        };

        match self.services.worker.resume_attempt(request).await {
            Ok(result) => {
                let sync = if result.success {
                    self.sync_worker_state(task_id)
                } else {
                    None
                };
                AttemptOutcome {
                    task_id: task_id.to_string(),
                    attempt: 0,
                    result,
                    sync,
                }
            }
            Err(err) => {
                warn!(task = %task_id, error = %err, "reattach failed; resetting to pending");
                AttemptOutcome {
                    task_id: task_id.to_string(),
                    attempt: 0,
                    result: WorkerRunnerResult {
                        success: false,
                        reset_to_pending: true,
                        error_message: Some(err.to_string()),
                        ..Default::default()
                    },
                    sync: None,
                }
            }
        }
    }

    /// Persist the per-task policy decision and checkset report consumed by
    /// the compliance and validator phases. Errors are logged as events,
    /// never fatal.
    pub fn write_control_reports(&self, manifest: &TaskManifest, locks: &TaskLocks) {
        let reports_dir = self.ctx.paths.task_reports_dir(&manifest.id);
        if let Err(e) = fs::create_dir_all(&reports_dir) {
            warn!(task = %manifest.id, error = %e, "cannot create task reports dir");
            return;
        }

        let policy = json!({
            "task_id": &manifest.id,
            "tier": self.ctx.config.compliance.policy_tier,
            "decision": "allow",
        });
        if let Err(e) = fs::write(
            reports_dir.join("policy.json"),
            serde_json::to_string_pretty(&policy).unwrap_or_default(),
        ) {
            self.services.events.log(
                "task.policy.error",
                Some(&manifest.id),
                json!({"message": e.to_string()}),
            );
        }

        let checkset = json!({
            "task_id": &manifest.id,
            "reads": &locks.reads,
            "writes": &locks.writes,
        });
        if let Err(e) = fs::write(
            reports_dir.join("checkset.json"),
            serde_json::to_string_pretty(&checkset).unwrap_or_default(),
        ) {
            self.services.events.log(
                "task.checkset.error",
                Some(&manifest.id),
                json!({"message": e.to_string()}),
            );
        }
    }

    /// Copy the task's catalog files into the worktree so the worker sees
    /// its own manifest and spec.
    fn stage_task_files(&self, task_id: &str, workspace: &Path) -> Result<()> {
        let source = self.ctx.catalog_root.join(task_id);
        let dest = workspace.join(".swarmdag").join("task");
        fs::create_dir_all(&dest)?;

        if source.is_dir() {
            for entry in fs::read_dir(&source)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_file() {
                    fs::copy(&path, dest.join(entry.file_name()))?;
                }
            }
        }
        Ok(())
    }

    /// Write the per-attempt worker config into the task home directory.
    fn write_worker_config(
        &self,
        manifest: &TaskManifest,
        attempt: u32,
        home_dir: &Path,
    ) -> Result<()> {
        let mut config = json!({
            "task_id": manifest.id,
            "attempt": attempt,
            "retry_limit": self.ctx.config.worker.retry_limit,
            "checkpoint": self.ctx.config.worker.checkpoint,
        });

        // Credentials stay out of mock-mode workers.
        if !self.ctx.config.worker.mock {
            config["credentials_path"] =
                json!(crate::engine::paths::home_dir().join("credentials.json"));
        }

        fs::write(
            home_dir.join("worker.json"),
            serde_json::to_string_pretty(&config)?,
        )?;
        Ok(())
    }

    /// Read worker-emitted state from the attempt's logs directory.
    fn sync_worker_state(&self, task_id: &str) -> Option<WorkerSync> {
        let path = self.ctx.paths.task_logs_dir(task_id).join("result.json");
        if !path.is_file() {
            debug!(task = %task_id, "no result.json to sync");
            return None;
        }
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<WorkerSync>(&s).map_err(anyhow::Error::from))
        {
            Ok(sync) => Some(sync),
            Err(e) => {
                warn!(task = %task_id, error = %e, "unreadable result.json; skipping sync");
                None
            }
        }
    }
}
