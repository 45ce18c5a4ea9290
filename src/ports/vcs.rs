// src/ports/vcs.rs

//! Version-control port.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::Result;

/// Request to merge a batch's task branches into the integration branch.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub repo_path: PathBuf,
    pub main_branch: String,
    /// `(task_id, branch_name)` pairs, merged sequentially in this order.
    pub branches: Vec<(String, String)>,
}

/// The first conflicting branch halts the merge.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    pub task_id: String,
    pub branch: String,
    pub message: String,
}

/// Result of [`Vcs::merge_task_branches`].
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// All branches merged; `merge_commit` is the resulting HEAD.
    Clean { merge_commit: String },
    /// A branch conflicted. `merge_commit` is the last clean HEAD, if any
    /// branch merged before the conflict.
    Conflict {
        conflict: MergeConflict,
        merge_commit: Option<String>,
    },
}

/// Git primitives the engine depends on.
///
/// Implementations are expected to be safe to call from the single-threaded
/// run engine; each method suspends until the underlying operation is done.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Fails if the working tree has unstaged changes.
    async fn ensure_clean_working_tree(&self, repo_path: &Path) -> Result<()>;

    async fn checkout_or_create_branch(&self, repo_path: &Path, branch: &str) -> Result<()>;

    /// SHA the run pins as its base at start.
    async fn resolve_run_base_sha(&self, repo_path: &Path, main_branch: &str) -> Result<String>;

    async fn head_sha(&self, repo_path: &Path) -> Result<String>;

    async fn is_ancestor(
        &self,
        repo_path: &Path,
        maybe_ancestor: &str,
        descendant: &str,
    ) -> Result<bool>;

    /// Create (or refresh) an isolated worktree for a task attempt, checked
    /// out on `branch` at `base_sha`.
    async fn prepare_worktree(
        &self,
        repo_path: &Path,
        workspace: &Path,
        branch: &str,
        base_sha: &str,
    ) -> Result<()>;

    /// Remove a task worktree.
    async fn remove_worktree(&self, repo_path: &Path, workspace: &Path) -> Result<()>;

    /// Merge task branches sequentially; the first conflict halts the batch.
    async fn merge_task_branches(&self, request: MergeRequest) -> Result<MergeOutcome>;
}
