// src/engine/run.rs

//! The top-level run loop.
//!
//! The run engine owns `RunState` for the whole run. Each iteration it
//! checks the stop signal, recovers any half-finished batch, computes the
//! ready set, packs and launches one batch, and hands the collected attempt
//! outcomes to the batch engine. Every mutation is followed by an atomic
//! save, so a crash at any point resumes from the last persisted decision.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::batch::{BatchEngine, ComplianceCounters};
use crate::engine::task::{AttemptOutcome, TaskEngine};
use crate::engine::{
    summary, RunContext, RunResult, Services, StopController, StopDescriptor, StopReason,
};
use crate::errors::{Result, SwarmdagError};
use crate::ledger::model::Ledger;
use crate::ledger::reuse;
use crate::ledger::store::LedgerStore;
use crate::ports::events::EventSink;
use crate::manifest::{load_catalog, TaskCatalog};
use crate::sched::blockage::{classify_blockage, Blockage};
use crate::sched::locks::LockResolver;
use crate::sched::scheduler::{plan_batch, topological_ready};
use crate::state::model::{ControlPlaneSnapshot, RunState, RunStatus, TaskStatus};
use crate::state::store::StateStore;
use crate::state::transitions;

/// Generate a fresh run id.
pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Resolve the run id for this invocation.
///
/// - `None`: a new run with a generated id.
/// - `Some(id)`: resume that run.
/// - `Some("")`: resume the latest run found under `runs_dir`.
pub fn resolve_run_id(
    runs_dir: &std::path::Path,
    resume: Option<&str>,
) -> Result<(String, bool)> {
    match resume {
        None => Ok((new_run_id(), false)),
        Some(id) if !id.trim().is_empty() => Ok((id.trim().to_string(), true)),
        Some(_) => {
            let mut candidates: Vec<String> = Vec::new();
            if runs_dir.is_dir() {
                for entry in fs::read_dir(runs_dir)? {
                    let entry = entry?;
                    if entry.path().join("state.json").is_file() {
                        if let Some(name) = entry.file_name().to_str() {
                            candidates.push(name.to_string());
                        }
                    }
                }
            }
            candidates.sort();
            candidates
                .pop()
                .map(|id| (id, true))
                .ok_or_else(|| SwarmdagError::ResumeBlocked {
                    reason: "no previous run found for project".to_string(),
                })
        }
    }
}

/// Drives one run to completion.
pub struct RunEngine {
    ctx: Arc<RunContext>,
    services: Services,
    store: StateStore,
    stop: StopController,
    task_engine: Arc<TaskEngine>,
    batch_engine: BatchEngine,
    catalog: TaskCatalog,
    state: RunState,
    base_sha: String,
    external_completed: BTreeSet<String>,
    counters: ComplianceCounters,
}

impl RunEngine {
    /// Initialize a run: clean tree, load-or-create state, pin the control
    /// plane, load the catalog, import/seed from the ledger.
    pub async fn prepare(
        ctx: RunContext,
        services: Services,
        stop: StopController,
        resume_requested: bool,
    ) -> Result<Self> {
        let ctx = Arc::new(ctx);
        let repo = ctx.paths.repo_path().to_path_buf();
        let events = services.events.clone();

        services.vcs.ensure_clean_working_tree(&repo).await?;
        services
            .vcs
            .checkout_or_create_branch(&repo, &ctx.config.project.main_branch)
            .await?;

        let store = StateStore::new(ctx.paths.run_dir());
        let ledger_store = LedgerStore::new(ctx.paths.project_dir());

        // Catalog first: an invalid catalog aborts before any state exists.
        let catalog = match load_catalog(&ctx.catalog_root, &ctx.task_filter) {
            Ok(c) => c,
            Err(e) => {
                events.log("run.tasks_invalid", None, json!({"message": e.to_string()}));
                return Err(e);
            }
        };

        let mut state = if store.exists() {
            let state = match store.load() {
                Ok(s) => s,
                Err(e) => {
                    events.log(
                        "run.resume.blocked",
                        None,
                        json!({"reason": e.to_string()}),
                    );
                    return Err(SwarmdagError::ResumeBlocked {
                        reason: e.to_string(),
                    });
                }
            };
            if !resume_requested {
                return Err(SwarmdagError::ResumeBlocked {
                    reason: format!("run '{}' already exists; pass --resume", ctx.run_id),
                });
            }
            match state.status {
                RunStatus::Running => state,
                RunStatus::Paused => {
                    let mut state = state;
                    transitions::set_run_status(&mut state, RunStatus::Running);
                    state
                }
                RunStatus::Complete | RunStatus::Failed => {
                    events.log(
                        "run.resume.blocked",
                        None,
                        json!({"reason": "state_not_running"}),
                    );
                    return Err(SwarmdagError::ResumeBlocked {
                        reason: "state_not_running".to_string(),
                    });
                }
            }
        } else {
            if resume_requested {
                events.log(
                    "run.resume.blocked",
                    None,
                    json!({"reason": "state_missing"}),
                );
                return Err(SwarmdagError::ResumeBlocked {
                    reason: "state_missing".to_string(),
                });
            }
            if catalog.is_empty() {
                events.log("run.no_tasks", None, json!({}));
                return Err(SwarmdagError::CatalogError(
                    "task catalog is empty".to_string(),
                ));
            }
            let state = RunState::new(
                ctx.run_id.clone(),
                ctx.config.project.name.clone(),
                repo.clone(),
                ctx.config.project.main_branch.clone(),
                catalog.ids().map(|s| s.to_string()).collect::<Vec<_>>(),
            );
            events.log(
                "run.start",
                None,
                json!({"project": &state.project, "tasks": state.tasks.len()}),
            );
            state
        };

        if resume_requested {
            events.log("run.resume", None, json!({"run_id": ctx.run_id}));
        }
        events.log(
            "run.tasks_loaded",
            None,
            json!({"count": catalog.len()}),
        );

        // Pin the control plane at the first run start; resumed runs keep
        // the snapshot they started with.
        let base_sha = match state.control_plane.as_ref() {
            Some(snapshot) => snapshot.base_sha.clone(),
            None => {
                let base_sha = services
                    .vcs
                    .resolve_run_base_sha(&repo, &ctx.config.project.main_branch)
                    .await?;
                let model_path = ctx.paths.model_path();
                state.control_plane = Some(ControlPlaneSnapshot {
                    base_sha: base_sha.clone(),
                    model_path: model_path.is_file().then_some(model_path),
                    pinned_at: Utc::now(),
                });
                base_sha
            }
        };

        // Ledger: import other runs when external deps are unresolved, then
        // seed eligible completed work.
        let mut ledger = ledger_store.load()?.unwrap_or_default();
        if ctx.config.run.reuse {
            if let Err(e) =
                Self::import_external_runs(&ctx, &ledger_store, &catalog, &ledger, events.as_ref())
            {
                events.log(
                    "ledger.import.error",
                    None,
                    json!({"message": e.to_string()}),
                );
            }
            ledger = ledger_store.load()?.unwrap_or_default();

            let seeded = reuse::seed_from_ledger(
                &mut state,
                &ledger,
                &catalog,
                services.vcs.as_ref(),
                events.as_ref(),
            )
            .await?;
            if !seeded.is_empty() {
                info!(count = seeded.len(), "seeded tasks from ledger");
            }
        }

        let external_completed = reuse::external_completed_deps(
            &catalog,
            &ledger,
            services.vcs.as_ref(),
            &repo,
        )
        .await?;
        for dep in &external_completed {
            events.log("deps.external_satisfied", Some(dep), json!({}));
        }

        store.save(&state)?;

        let task_engine = Arc::new(TaskEngine::new(ctx.clone(), services.clone()));
        let batch_engine =
            BatchEngine::new(ctx.clone(), services.clone(), ledger_store.clone())?;

        services.worker.prepare(ctx.config.worker.build_image).await?;

        Ok(Self {
            ctx,
            services,
            store,
            stop,
            task_engine,
            batch_engine,
            catalog,
            state,
            base_sha,
            external_completed,
            counters: ComplianceCounters::default(),
        })
    }

    /// When reuse is on and catalog tasks depend on ids that are neither in
    /// the catalog nor the ledger, sweep other runs of this project into
    /// the ledger.
    fn import_external_runs(
        ctx: &RunContext,
        ledger_store: &LedgerStore,
        catalog: &TaskCatalog,
        ledger: &Ledger,
        events: &dyn EventSink,
    ) -> Result<()> {
        let missing_external = catalog.manifests().any(|m| {
            m.dependencies
                .iter()
                .any(|d| !catalog.contains(d) && ledger.get(d).is_none())
        });
        if !missing_external {
            return Ok(());
        }

        let runs_dir = ctx.paths.runs_dir();
        if !runs_dir.is_dir() {
            return Ok(());
        }
        events.log("ledger.import.start", None, json!({}));

        let mut imported = 0usize;
        for entry in fs::read_dir(&runs_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ctx.run_id {
                continue;
            }
            let other = StateStore::new(entry.path());
            if !other.exists() {
                continue;
            }
            match other.load() {
                Ok(other_state) => {
                    let outcome = ledger_store.import_from_run(&other_state, catalog)?;
                    imported += outcome.imported.len();
                    for (task_id, message) in outcome.failures {
                        events.log(
                            "ledger.import.error",
                            Some(&task_id),
                            json!({"message": message, "run_id": &name}),
                        );
                    }
                }
                Err(e) => {
                    debug!(run = %name, error = %e, "skipping unreadable run state");
                }
            }
        }
        events.log(
            "ledger.import.complete",
            None,
            json!({"imported": imported}),
        );
        Ok(())
    }

    /// The main loop. Consumes the engine and returns the final result.
    pub async fn run(mut self) -> Result<RunResult> {
        let result = self.run_loop().await;
        self.services.events.close();
        result
    }

    async fn run_loop(&mut self) -> Result<RunResult> {
        loop {
            if self.stop.is_stopped() {
                return self.stop_run().await;
            }

            // Crash/stop recovery: a persisted running batch is re-driven
            // before anything new is scheduled.
            if let Some(batch_id) = self.state.running_batch().map(|b| b.batch_id) {
                info!(batch_id, "recovering in-flight batch");
                let outcomes = self.recover_batch(batch_id).await;
                let stop_reason = self
                    .batch_engine
                    .finalize_batch(
                        &mut self.state,
                        &mut self.catalog,
                        &self.store,
                        batch_id,
                        outcomes,
                        &self.stop,
                        &mut self.counters,
                    )
                    .await?;
                if let Some(reason) = stop_reason {
                    return self.finish_stopped(reason).await;
                }
                continue;
            }

            // Tasks validated but never merged (stop arrived mid-batch) are
            // reclaimed for a fresh attempt.
            for task_id in self.state.tasks_with_status(TaskStatus::Validated) {
                warn!(task = %task_id, "validated task has no running batch; resetting");
                transitions::reset_task_to_pending(
                    &mut self.state,
                    &task_id,
                    "stopped before merge",
                )?;
            }

            let pending: BTreeSet<String> = self
                .state
                .tasks_with_status(TaskStatus::Pending)
                .into_iter()
                .collect();
            if pending.is_empty() {
                break;
            }

            let mut effective_completed = self.state.completed_task_ids();
            effective_completed.extend(self.external_completed.iter().cloned());

            let ready = topological_ready(&pending, &self.catalog, &effective_completed);
            if ready.is_empty() {
                match classify_blockage(&self.state, &self.catalog, &effective_completed) {
                    Blockage::Paused { blocked_tasks } => {
                        transitions::set_run_status(&mut self.state, RunStatus::Paused);
                        self.services.events.log(
                            "run.paused",
                            None,
                            json!({
                                "reason": "blocked_dependencies",
                                "blocked_tasks": blocked_tasks,
                                "resume": format!("swarmdag --resume {}", self.ctx.run_id),
                            }),
                        );
                    }
                    Blockage::Failed { reason } => {
                        transitions::set_run_status(&mut self.state, RunStatus::Failed);
                        self.services
                            .events
                            .log("run.blocked", None, json!({"reason": reason}));
                    }
                }
                break;
            }

            let resolver = self.lock_resolver();
            let plan = plan_batch(
                &ready,
                &self.catalog,
                &resolver,
                self.ctx.config.run.max_parallel,
            )?;
            if plan.tasks.is_empty() {
                // Only reachable if every ready task is unschedulable, which
                // catalog validation is supposed to preclude.
                transitions::set_run_status(&mut self.state, RunStatus::Failed);
                self.services.events.log(
                    "run.blocked",
                    None,
                    json!({"reason": "no schedulable task in ready set"}),
                );
                break;
            }
            let batch_id = self.state.next_batch_id();
            transitions::start_batch(&mut self.state, batch_id, &plan.tasks, plan.locks.clone())?;
            self.store.save(&self.state)?;

            self.services.events.log(
                "batch.start",
                None,
                json!({
                    "batch_id": batch_id,
                    "tasks": &plan.tasks,
                    "locks": {"reads": &plan.locks.reads, "writes": &plan.locks.writes},
                    "lock_mode": format!("{:?}", self.ctx.config.run.lock_mode).to_lowercase(),
                }),
            );

            if self.ctx.dry_run {
                for task_id in &plan.tasks {
                    transitions::mark_task_skipped(&mut self.state, task_id)?;
                }
                transitions::close_batch(
                    &mut self.state,
                    batch_id,
                    crate::state::model::BatchStatus::Complete,
                    None,
                    None,
                )?;
                self.store.save(&self.state)?;
                self.services
                    .events
                    .log("batch.dry_run", None, json!({"batch_id": batch_id}));
                continue;
            }

            let outcomes = self.launch_batch(&plan.tasks, &resolver).await?;
            let stop_reason = self
                .batch_engine
                .finalize_batch(
                    &mut self.state,
                    &mut self.catalog,
                    &self.store,
                    batch_id,
                    outcomes,
                    &self.stop,
                    &mut self.counters,
                )
                .await?;

            if let Some(reason) = stop_reason {
                return self.finish_stopped(reason).await;
            }
        }

        self.finish_run().await
    }

    fn lock_resolver(&self) -> LockResolver {
        LockResolver::new(
            self.ctx.config.run.lock_mode,
            Some(self.ctx.paths.reports_dir()),
            Some(self.ctx.config.compliance.fallback_resource.clone()),
        )
    }

    /// Reattach to every running task of a recovered batch.
    async fn recover_batch(&mut self, batch_id: u64) -> Vec<AttemptOutcome> {
        let running: Vec<(String, Option<String>)> = self
            .state
            .batches
            .iter()
            .find(|b| b.batch_id == batch_id)
            .map(|b| b.tasks.clone())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| {
                let task = self.state.task(&id)?;
                (task.status == TaskStatus::Running)
                    .then(|| (id, task.container_id.clone()))
            })
            .collect();

        let mut outcomes = Vec::new();
        for (task_id, container_hint) in running {
            outcomes.push(
                self.task_engine
                    .resume_running_task(&task_id, container_hint)
                    .await,
            );
        }
        outcomes
    }

    /// Record attempt bookkeeping and fan out worker attempts in parallel.
    async fn launch_batch(
        &mut self,
        task_ids: &[String],
        resolver: &LockResolver,
    ) -> Result<Vec<AttemptOutcome>> {
        let control_plane_enabled = self
            .state
            .control_plane
            .as_ref()
            .and_then(|cp| cp.model_path.as_ref())
            .is_some();

        for task_id in task_ids {
            transitions::record_task_attempt_start(
                &mut self.state,
                task_id,
                TaskEngine::branch_name(task_id),
                self.ctx.paths.worktree_dir(task_id),
                self.ctx.paths.task_logs_dir(task_id),
            )?;

            if control_plane_enabled {
                if let Some(manifest) = self.catalog.get(task_id) {
                    let locks = resolver.resolve(manifest)?;
                    self.task_engine.write_control_reports(manifest, &locks);
                }
            }
        }
        self.store.save(&self.state)?;

        let mut set: JoinSet<AttemptOutcome> = JoinSet::new();
        for task_id in task_ids {
            let manifest = match self.catalog.get(task_id) {
                Some(m) => m.clone(),
                None => continue,
            };
            let attempt = self
                .state
                .task(task_id)
                .map(|t| t.attempts)
                .unwrap_or(1);
            let engine = self.task_engine.clone();
            let base_sha = self.base_sha.clone();
            set.spawn(async move { engine.run_attempt(&manifest, attempt, &base_sha).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // A panicked attempt is a failed attempt; the task id is
                    // unrecoverable here, so surface it as an engine error.
                    return Err(SwarmdagError::WorkerError(format!(
                        "task attempt panicked: {e}"
                    )));
                }
            }
        }
        Ok(outcomes)
    }

    /// Exit path for stop reasons raised at a batch boundary.
    async fn finish_stopped(&mut self, reason: StopReason) -> Result<RunResult> {
        self.services.events.log(
            "run.stop",
            None,
            json!({"reason": reason.as_str()}),
        );

        let status = match reason {
            StopReason::IntegrationDoctorFailed | StopReason::MergeConflict => RunStatus::Failed,
            StopReason::BudgetBlock => RunStatus::Paused,
            StopReason::Signal => RunStatus::Running,
        };
        transitions::set_run_status(&mut self.state, status);
        self.store.save(&self.state)?;
        self.write_summary()?;

        Ok(RunResult {
            run_id: self.ctx.run_id.clone(),
            status: self.state.status,
            plan: self.state.batches.clone(),
            stopped: None,
        })
    }

    /// Exit path for an external stop signal: workers are asked to shut
    /// down, and the run stays `running` so it can be resumed.
    async fn stop_run(&mut self) -> Result<RunResult> {
        let requested = self.ctx.config.run.stop_containers_on_exit;
        let outcome = match self.services.worker.stop(requested).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "worker stop reported an error");
                crate::ports::worker::StopOutcome {
                    stopped: Vec::new(),
                    errors: vec![e.to_string()],
                }
            }
        };

        let containers: &'static str = if requested { "stopped" } else { "left_running" };
        self.services.events.log(
            "run.stop",
            None,
            json!({
                "reason": "signal",
                "containers": containers,
                "containers_stopped": &outcome.stopped,
            }),
        );

        // Keep `running` on disk so the run is resumable.
        transitions::set_run_status(&mut self.state, RunStatus::Running);
        self.store.save(&self.state)?;

        Ok(RunResult {
            run_id: self.ctx.run_id.clone(),
            status: RunStatus::Running,
            plan: self.state.batches.clone(),
            stopped: Some(StopDescriptor {
                reason: StopReason::Signal,
                containers,
                stop_containers_requested: requested,
                stopped_containers: outcome.stopped,
                stop_errors: outcome.errors,
            }),
        })
    }

    /// Natural loop exit: decide the final status and write the summary.
    async fn finish_run(&mut self) -> Result<RunResult> {
        if self.state.status == RunStatus::Running {
            let blocked = self.state.blocked_tasks();
            if !blocked.is_empty() {
                transitions::set_run_status(&mut self.state, RunStatus::Paused);
                self.services.events.log(
                    "run.paused",
                    None,
                    json!({
                        "reason": "blocked_tasks",
                        "blocked_tasks": blocked,
                        "resume": format!("swarmdag --resume {}", self.ctx.run_id),
                    }),
                );
            } else {
                transitions::set_run_status(&mut self.state, RunStatus::Complete);
            }
        }

        self.store.save(&self.state)?;
        self.services.events.log(
            "run.complete",
            None,
            json!({"status": format!("{:?}", self.state.status).to_lowercase()}),
        );

        let report_path = self.write_summary()?;
        self.services.events.log(
            "run.summary",
            None,
            json!({
                "status": format!("{:?}", self.state.status).to_lowercase(),
                "report_path": report_path,
                "metrics": {
                    "tokens_used": self.state.tokens_used,
                    "estimated_cost": self.state.estimated_cost,
                    "compliance_warns": self.counters.warn_count,
                    "compliance_blocks": self.counters.block_count,
                },
            }),
        );

        Ok(RunResult {
            run_id: self.ctx.run_id.clone(),
            status: self.state.status,
            plan: self.state.batches.clone(),
            stopped: None,
        })
    }

    fn write_summary(&self) -> Result<std::path::PathBuf> {
        summary::write_summary(&self.ctx, &self.state, &self.counters)
    }

    /// Read-only view for tests and callers.
    pub fn state(&self) -> &RunState {
        &self.state
    }
}
