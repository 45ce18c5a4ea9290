// src/exec/git.rs

//! `Vcs` implementation backed by the `git` CLI.

use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{Result, SwarmdagError};
use crate::ports::vcs::{MergeConflict, MergeOutcome, MergeRequest, Vcs};

/// Shell-out git adapter.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    /// Run a git command and capture its output.
    async fn git(&self, repo_path: &Path, args: &[&str]) -> Result<std::process::Output> {
        debug!(repo = ?repo_path, ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("spawning git {:?}", args))?;
        Ok(output)
    }

    /// Run a git command, failing on non-zero exit.
    async fn git_ok(&self, repo_path: &Path, args: &[&str]) -> Result<String> {
        let output = self.git(repo_path, args).await?;
        if !output.status.success() {
            return Err(SwarmdagError::VcsError(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn ensure_clean_working_tree(&self, repo_path: &Path) -> Result<()> {
        let status = self
            .git_ok(repo_path, &["status", "--porcelain"])
            .await?;
        if !status.is_empty() {
            return Err(SwarmdagError::VcsError(format!(
                "working tree at {:?} has uncommitted changes",
                repo_path
            )));
        }
        Ok(())
    }

    async fn checkout_or_create_branch(&self, repo_path: &Path, branch: &str) -> Result<()> {
        let exists = self
            .git(
                repo_path,
                &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            )
            .await?
            .status
            .success();

        if exists {
            self.git_ok(repo_path, &["checkout", branch]).await?;
        } else {
            self.git_ok(repo_path, &["checkout", "-b", branch]).await?;
        }
        Ok(())
    }

    async fn resolve_run_base_sha(&self, repo_path: &Path, main_branch: &str) -> Result<String> {
        self.git_ok(repo_path, &["rev-parse", main_branch]).await
    }

    async fn head_sha(&self, repo_path: &Path) -> Result<String> {
        self.git_ok(repo_path, &["rev-parse", "HEAD"]).await
    }

    async fn is_ancestor(
        &self,
        repo_path: &Path,
        maybe_ancestor: &str,
        descendant: &str,
    ) -> Result<bool> {
        let output = self
            .git(
                repo_path,
                &["merge-base", "--is-ancestor", maybe_ancestor, descendant],
            )
            .await?;
        Ok(output.status.success())
    }

    async fn prepare_worktree(
        &self,
        repo_path: &Path,
        workspace: &Path,
        branch: &str,
        base_sha: &str,
    ) -> Result<()> {
        if workspace.exists() {
            // A stale worktree from an earlier attempt is replaced wholesale.
            let _ = self
                .git(
                    repo_path,
                    &[
                        "worktree",
                        "remove",
                        "--force",
                        workspace.to_str().unwrap_or_default(),
                    ],
                )
                .await;
        }
        if let Some(parent) = workspace.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let workspace_str = workspace
            .to_str()
            .ok_or_else(|| SwarmdagError::VcsError("non-UTF8 workspace path".to_string()))?;
        self.git_ok(
            repo_path,
            &["worktree", "add", "--force", "-B", branch, workspace_str, base_sha],
        )
        .await?;
        info!(workspace = ?workspace, branch = %branch, "worktree ready");
        Ok(())
    }

    async fn remove_worktree(&self, repo_path: &Path, workspace: &Path) -> Result<()> {
        let workspace_str = workspace
            .to_str()
            .ok_or_else(|| SwarmdagError::VcsError("non-UTF8 workspace path".to_string()))?;
        self.git_ok(repo_path, &["worktree", "remove", "--force", workspace_str])
            .await?;
        Ok(())
    }

    async fn merge_task_branches(&self, request: MergeRequest) -> Result<MergeOutcome> {
        let repo = request.repo_path.as_path();
        self.git_ok(repo, &["checkout", &request.main_branch]).await?;

        let mut last_clean_head: Option<String> = None;

        for (task_id, branch) in &request.branches {
            let message = format!("merge task {task_id}");
            let output = self
                .git(repo, &["merge", "--no-ff", "-m", &message, branch])
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                warn!(task = %task_id, branch = %branch, "merge conflict; aborting merge");
                let _ = self.git(repo, &["merge", "--abort"]).await;
                return Ok(MergeOutcome::Conflict {
                    conflict: MergeConflict {
                        task_id: task_id.clone(),
                        branch: branch.clone(),
                        message: if stderr.is_empty() { stdout } else { stderr },
                    },
                    merge_commit: last_clean_head,
                });
            }

            last_clean_head = Some(self.head_sha(repo).await?);
        }

        match last_clean_head {
            Some(merge_commit) => Ok(MergeOutcome::Clean { merge_commit }),
            None => {
                // Nothing to merge degenerates to the current HEAD.
                let head = self.head_sha(repo).await?;
                Ok(MergeOutcome::Clean { merge_commit: head })
            }
        }
    }
}
