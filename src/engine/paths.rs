// src/engine/paths.rs

//! Filesystem layout for one run.
//!
//! Orchestrator-side state lives under the swarmdag home
//! (`~/.swarmdag`, overridable via `SWARMDAG_HOME`):
//!
//! ```text
//! <home>/projects/<project>/runs/<run_id>/state.json
//! <home>/projects/<project>/runs/<run_id>/orchestrator.jsonl
//! <home>/projects/<project>/ledger.json
//! ```
//!
//! Repo-side artifacts live under `.swarmdag` inside the repository:
//!
//! ```text
//! <repo>/.swarmdag/runs/<run_id>/summary.json
//! <repo>/.swarmdag/runs/<run_id>/tasks/<task>/...
//! <repo>/.swarmdag/worktrees/<task>
//! ```

use std::path::{Path, PathBuf};

const REPO_DIR: &str = ".swarmdag";

/// Resolve the swarmdag home directory.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("SWARMDAG_HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    let user_home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(user_home).join(".swarmdag")
}

/// All paths one run reads and writes.
#[derive(Debug, Clone)]
pub struct RunPaths {
    home: PathBuf,
    project: String,
    run_id: String,
    repo_path: PathBuf,
}

impl RunPaths {
    pub fn new(
        home: PathBuf,
        project: impl Into<String>,
        run_id: impl Into<String>,
        repo_path: PathBuf,
    ) -> Self {
        Self {
            home,
            project: project.into(),
            run_id: run_id.into(),
            repo_path,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn project_dir(&self) -> PathBuf {
        self.home.join("projects").join(&self.project)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.project_dir().join("runs")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.runs_dir().join(&self.run_id)
    }

    pub fn events_path(&self) -> PathBuf {
        self.run_dir().join("orchestrator.jsonl")
    }

    /// Repo-side directory for this run's reports.
    pub fn repo_run_dir(&self) -> PathBuf {
        self.repo_path.join(REPO_DIR).join("runs").join(&self.run_id)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.repo_run_dir().join("summary.json")
    }

    /// Repo-side reports directory for one task (scope, policy, checkset).
    pub fn task_reports_dir(&self, task_id: &str) -> PathBuf {
        self.repo_run_dir().join("tasks").join(task_id)
    }

    /// Parent of all per-task report dirs; the lock resolver scans it.
    pub fn reports_dir(&self) -> PathBuf {
        self.repo_run_dir().join("tasks")
    }

    /// Worktree for one task attempt.
    pub fn worktree_dir(&self, task_id: &str) -> PathBuf {
        self.repo_path.join(REPO_DIR).join("worktrees").join(task_id)
    }

    /// Orchestrator-side logs directory for one task.
    pub fn task_logs_dir(&self, task_id: &str) -> PathBuf {
        self.run_dir().join("tasks").join(task_id).join("logs")
    }

    /// Per-task "home" holding the attempt's worker config.
    pub fn task_home_dir(&self, task_id: &str) -> PathBuf {
        self.run_dir().join("tasks").join(task_id).join("home")
    }

    /// Control-plane model file pinned at run start, if present.
    pub fn model_path(&self) -> PathBuf {
        self.repo_path.join(REPO_DIR).join("model.json")
    }
}
