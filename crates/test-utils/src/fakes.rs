#![allow(dead_code)]

//! Fake port implementations for engine tests.
//!
//! All fakes are `Arc`-friendly: behaviour is scripted up front, calls are
//! recorded behind mutexes, and assertions read the records afterwards.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use swarmdag::errors::Result;
use swarmdag::ports::events::EventSink;
use swarmdag::ports::validator::{
    ValidationReport, ValidatorKind, ValidatorParams, ValidatorRunner,
};
use swarmdag::ports::vcs::{MergeConflict, MergeOutcome, MergeRequest, Vcs};
use swarmdag::ports::worker::{
    StopOutcome, TaskAttemptRequest, TaskResumeRequest, WorkerRunner, WorkerRunnerResult,
};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(String, Option<String>, Value)>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Option<String>, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _, _)| t.clone())
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == event_type)
            .count()
    }

    pub fn has(&self, event_type: &str) -> bool {
        self.count(event_type) > 0
    }
}

impl EventSink for MemoryEventSink {
    fn log(&self, event_type: &str, task_id: Option<&str>, payload: Value) {
        self.events.lock().unwrap().push((
            event_type.to_string(),
            task_id.map(|s| s.to_string()),
            payload,
        ));
    }

    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Vcs
// ---------------------------------------------------------------------------

/// In-memory git fake.
///
/// - `head` starts at `"base-0"`; each clean merge advances it to
///   `"merge-<n>"` and records the new commit as reachable.
/// - Branch names scripted via [`FakeVcs::conflict_on`] conflict.
#[derive(Debug)]
pub struct FakeVcs {
    head: Mutex<String>,
    reachable: Mutex<HashSet<String>>,
    conflicts: Mutex<HashSet<String>>,
    merge_counter: AtomicU64,
    pub merges: Mutex<Vec<Vec<String>>>,
    pub removed_worktrees: Mutex<Vec<PathBuf>>,
    clean_tree: Mutex<bool>,
}

impl Default for FakeVcs {
    fn default() -> Self {
        let head = "base-0".to_string();
        let mut reachable = HashSet::new();
        reachable.insert(head.clone());
        Self {
            head: Mutex::new(head),
            reachable: Mutex::new(reachable),
            conflicts: Mutex::new(HashSet::new()),
            merge_counter: AtomicU64::new(0),
            merges: Mutex::new(Vec::new()),
            removed_worktrees: Mutex::new(Vec::new()),
            clean_tree: Mutex::new(true),
        }
    }
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a merge conflict for the given branch name.
    pub fn conflict_on(&self, branch: &str) {
        self.conflicts.lock().unwrap().insert(branch.to_string());
    }

    /// Mark a commit as reachable from HEAD (for ledger reuse tests).
    pub fn mark_reachable(&self, sha: &str) {
        self.reachable.lock().unwrap().insert(sha.to_string());
    }

    pub fn set_dirty(&self) {
        *self.clean_tree.lock().unwrap() = false;
    }

    pub fn current_head(&self) -> String {
        self.head.lock().unwrap().clone()
    }

    /// Branch lists from every `merge_task_branches` call.
    pub fn merged_branches(&self) -> Vec<Vec<String>> {
        self.merges.lock().unwrap().clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn ensure_clean_working_tree(&self, _repo_path: &Path) -> Result<()> {
        if *self.clean_tree.lock().unwrap() {
            Ok(())
        } else {
            Err(swarmdag::errors::SwarmdagError::VcsError(
                "working tree has uncommitted changes".to_string(),
            ))
        }
    }

    async fn checkout_or_create_branch(&self, _repo_path: &Path, _branch: &str) -> Result<()> {
        Ok(())
    }

    async fn resolve_run_base_sha(&self, _repo_path: &Path, _main_branch: &str) -> Result<String> {
        Ok(self.current_head())
    }

    async fn head_sha(&self, _repo_path: &Path) -> Result<String> {
        Ok(self.current_head())
    }

    async fn is_ancestor(
        &self,
        _repo_path: &Path,
        maybe_ancestor: &str,
        _descendant: &str,
    ) -> Result<bool> {
        Ok(self.reachable.lock().unwrap().contains(maybe_ancestor))
    }

    async fn prepare_worktree(
        &self,
        _repo_path: &Path,
        workspace: &Path,
        _branch: &str,
        _base_sha: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(workspace)?;
        Ok(())
    }

    async fn remove_worktree(&self, _repo_path: &Path, workspace: &Path) -> Result<()> {
        self.removed_worktrees
            .lock()
            .unwrap()
            .push(workspace.to_path_buf());
        Ok(())
    }

    async fn merge_task_branches(&self, request: MergeRequest) -> Result<MergeOutcome> {
        self.merges.lock().unwrap().push(
            request
                .branches
                .iter()
                .map(|(_, branch)| branch.clone())
                .collect(),
        );

        let mut last_clean: Option<String> = None;
        for (task_id, branch) in &request.branches {
            if self.conflicts.lock().unwrap().contains(branch) {
                return Ok(MergeOutcome::Conflict {
                    conflict: MergeConflict {
                        task_id: task_id.clone(),
                        branch: branch.clone(),
                        message: "CONFLICT (content): simulated".to_string(),
                    },
                    merge_commit: last_clean,
                });
            }
            let n = self.merge_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let commit = format!("merge-{n}");
            *self.head.lock().unwrap() = commit.clone();
            self.reachable.lock().unwrap().insert(commit.clone());
            last_clean = Some(commit);
        }

        let merge_commit = match last_clean {
            Some(c) => c,
            None => self.current_head(),
        };
        Ok(MergeOutcome::Clean { merge_commit })
    }
}

// ---------------------------------------------------------------------------
// WorkerRunner
// ---------------------------------------------------------------------------

/// What a fake attempt should do for one task.
#[derive(Debug, Clone)]
pub enum FakeAttempt {
    /// Exit zero and write `result.json` with this sync payload.
    Succeed { sync: Value },
    /// Exit non-zero with a message.
    Fail { message: String },
}

impl Default for FakeAttempt {
    fn default() -> Self {
        FakeAttempt::Succeed { sync: json!({}) }
    }
}

/// Scripted worker runner: no processes, immediate results.
#[derive(Debug, Default)]
pub struct FakeWorkerRunner {
    attempts: Mutex<Vec<String>>,
    resumes: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, FakeAttempt>>,
    /// Tasks that report a live process on reattach.
    resumable: Mutex<HashSet<String>>,
    stopped: Mutex<bool>,
    cleaned: Mutex<Vec<String>>,
}

impl FakeWorkerRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, task_id: &str, behaviour: FakeAttempt) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), behaviour);
    }

    /// Script success with worker-reported changed files and usage.
    pub fn succeed_with(&self, task_id: &str, tokens: u64, changed_files: &[&str]) {
        self.script(
            task_id,
            FakeAttempt::Succeed {
                sync: json!({
                    "tokens_used": tokens,
                    "estimated_cost": tokens as f64 / 1000.0,
                    "checkpoint_commits": [format!("ckpt-{task_id}")],
                    "changed_files": changed_files,
                }),
            },
        );
    }

    pub fn fail(&self, task_id: &str, message: &str) {
        self.script(
            task_id,
            FakeAttempt::Fail {
                message: message.to_string(),
            },
        );
    }

    /// Make `resume_attempt` find a live process that finishes successfully.
    pub fn resumable(&self, task_id: &str) {
        self.resumable.lock().unwrap().insert(task_id.to_string());
    }

    /// Task ids that had attempts launched, in launch order.
    pub fn launched(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn resumed(&self) -> Vec<String> {
        self.resumes.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }

    pub fn was_stopped(&self) -> bool {
        *self.stopped.lock().unwrap()
    }
}

#[async_trait]
impl WorkerRunner for FakeWorkerRunner {
    async fn prepare(&self, _build_image: bool) -> Result<()> {
        Ok(())
    }

    async fn run_attempt(&self, request: TaskAttemptRequest) -> Result<WorkerRunnerResult> {
        self.attempts.lock().unwrap().push(request.task_id.clone());

        let behaviour = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.task_id)
            .cloned()
            .unwrap_or_default();

        match behaviour {
            FakeAttempt::Succeed { sync } => {
                std::fs::create_dir_all(&request.logs_dir)?;
                std::fs::write(
                    request.logs_dir.join("result.json"),
                    serde_json::to_string(&sync).unwrap(),
                )?;
                Ok(WorkerRunnerResult {
                    success: true,
                    container_id: Some(format!("fake-{}", request.task_id)),
                    reset_to_pending: false,
                    error_message: None,
                })
            }
            FakeAttempt::Fail { message } => Ok(WorkerRunnerResult {
                success: false,
                container_id: Some(format!("fake-{}", request.task_id)),
                reset_to_pending: false,
                error_message: Some(message),
            }),
        }
    }

    async fn resume_attempt(&self, request: TaskResumeRequest) -> Result<WorkerRunnerResult> {
        self.resumes.lock().unwrap().push(request.task_id.clone());

        if self.resumable.lock().unwrap().contains(&request.task_id) {
            std::fs::create_dir_all(&request.logs_dir)?;
            std::fs::write(request.logs_dir.join("result.json"), "{}")?;
            Ok(WorkerRunnerResult {
                success: true,
                container_id: request.container_id_hint,
                reset_to_pending: false,
                error_message: None,
            })
        } else {
            Ok(WorkerRunnerResult {
                success: false,
                container_id: None,
                reset_to_pending: true,
                error_message: Some("worker process not found".to_string()),
            })
        }
    }

    async fn cleanup_task(&self, task_id: &str, _container_id_hint: Option<&str>) -> Result<()> {
        self.cleaned.lock().unwrap().push(task_id.to_string());
        Ok(())
    }

    async fn stop(&self, stop_containers: bool) -> Result<StopOutcome> {
        *self.stopped.lock().unwrap() = true;
        Ok(StopOutcome {
            stopped: if stop_containers {
                self.attempts.lock().unwrap().clone()
            } else {
                Vec::new()
            },
            errors: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// ValidatorRunner
// ---------------------------------------------------------------------------

/// Scripted validator runner; everything passes unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeValidatorRunner {
    failing: Mutex<HashSet<&'static str>>,
    invocations: Mutex<Vec<String>>,
}

impl FakeValidatorRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a validator kind fail ("test", "style", "architecture",
    /// "doctor").
    pub fn fail_kind(&self, kind: ValidatorKind) {
        self.failing.lock().unwrap().insert(kind.as_str());
    }

    pub fn pass_kind(&self, kind: ValidatorKind) {
        self.failing.lock().unwrap().remove(kind.as_str());
    }

    /// Validator kinds invoked, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn doctor_runs(&self) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == "doctor")
            .count()
    }
}

#[async_trait]
impl ValidatorRunner for FakeValidatorRunner {
    async fn run(&self, kind: ValidatorKind, _params: ValidatorParams) -> Result<ValidationReport> {
        self.invocations
            .lock()
            .unwrap()
            .push(kind.as_str().to_string());

        let pass = !self.failing.lock().unwrap().contains(kind.as_str());
        Ok(ValidationReport {
            pass,
            summary: if pass {
                format!("{} passed", kind.as_str())
            } else {
                format!("{} failed", kind.as_str())
            },
            details: None,
        })
    }
}
