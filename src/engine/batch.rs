// src/engine/batch.rs

//! Batch finalization.
//!
//! After all attempts of a batch return, their side effects are applied in
//! a fixed order: usage sync, status updates, compliance/rescope, budget
//! check, validators, merge, integration doctor, ledger write, cleanup.
//! Outcomes are processed in task-id order so logs and ledger writes stay
//! reproducible regardless of completion order.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::config::model::ValidatorMode;
use crate::engine::compliance::{self, ComplianceOutcome, ResourceMap};
use crate::engine::task::AttemptOutcome;
use crate::engine::{budget, RunContext, Services, StopController, StopReason};
use crate::errors::Result;
use crate::ledger::model::{LedgerEntry, LedgerEntryStatus};
use crate::ledger::store::{recompute_fingerprint, LedgerStore};
use crate::manifest::TaskCatalog;
use crate::ports::validator::{ValidatorKind, ValidatorParams};
use crate::ports::vcs::{MergeOutcome, MergeRequest};
use crate::state::model::{BatchStatus, RunState, TaskStatus, ValidatorResult};
use crate::state::store::StateStore;
use crate::state::transitions;

/// Running totals surfaced in the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceCounters {
    pub warn_count: u32,
    pub block_count: u32,
}

/// Applies a batch's side effects and closes it.
pub struct BatchEngine {
    ctx: Arc<RunContext>,
    services: Services,
    resource_map: ResourceMap,
    ledger: LedgerStore,
}

impl BatchEngine {
    pub fn new(ctx: Arc<RunContext>, services: Services, ledger: LedgerStore) -> Result<Self> {
        let resource_map = ResourceMap::compile(&ctx.config.resources)?;
        Ok(Self {
            ctx,
            services,
            resource_map,
            ledger,
        })
    }

    /// Drive one batch from collected attempt outcomes to a closed batch.
    ///
    /// Returns a stop reason when the run must not schedule further batches.
    pub async fn finalize_batch(
        &self,
        state: &mut RunState,
        catalog: &mut TaskCatalog,
        store: &StateStore,
        batch_id: u64,
        mut outcomes: Vec<AttemptOutcome>,
        stop: &StopController,
        counters: &mut ComplianceCounters,
    ) -> Result<Option<StopReason>> {
        outcomes.sort_by(|a, b| a.task_id.cmp(&b.task_id));

        self.apply_attempt_results(state, &outcomes)?;

        let budget_stop = {
            let breaches = budget::detect_breaches(state, &self.ctx.config.budget);
            budget::handle_breaches(&breaches, &self.ctx.config.budget, self.services.events.as_ref())
        };

        self.run_compliance_phase(state, catalog, batch_id, counters)?;
        store.save(state)?;

        self.emit_blast_radius(state, batch_id);
        self.run_validators(state, batch_id).await?;

        // Survivors of every validator become mergeable.
        for task_id in self.batch_tasks_with_status(state, batch_id, TaskStatus::Running) {
            transitions::mark_task_validated(state, &task_id)?;
        }
        store.save(state)?;

        let validated = self.batch_tasks_with_status(state, batch_id, TaskStatus::Validated);

        if validated.is_empty() || stop.is_stopped() {
            let status = self.residual_batch_status(state, batch_id);
            transitions::close_batch(state, batch_id, status, None, None)?;
            store.save(state)?;
            self.services.events.log(
                "batch.complete",
                None,
                json!({"batch_id": batch_id, "status": "no_merge"}),
            );
            return Ok(budget_stop);
        }

        let merge_stop = self
            .merge_and_doctor(state, catalog, store, batch_id, &validated)
            .await?;

        Ok(merge_stop.or(budget_stop))
    }

    /// Usage sync and per-task status updates from raw attempt results.
    fn apply_attempt_results(
        &self,
        state: &mut RunState,
        outcomes: &[AttemptOutcome],
    ) -> Result<()> {
        for outcome in outcomes {
            let task_id = outcome.task_id.as_str();

            if let Some(sync) = outcome.sync.as_ref() {
                transitions::record_task_usage(
                    state,
                    task_id,
                    sync.usage(outcome.attempt),
                    &sync.checkpoint_commits,
                    &sync.changed_files,
                )?;
            }
            transitions::record_task_worker_handles(
                state,
                task_id,
                outcome.result.container_id.clone(),
                None,
            )?;

            if outcome.result.reset_to_pending {
                let reason = outcome
                    .result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "worker requested reset".to_string());
                transitions::reset_task_to_pending(state, task_id, &reason)?;
                self.services
                    .events
                    .log("task.reset", Some(task_id), json!({"reason": reason}));
            } else if !outcome.result.success {
                let message = outcome
                    .result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "worker exited non-zero".to_string());
                transitions::mark_task_failed(state, task_id, &message)?;
                self.services
                    .events
                    .log("task.failed", Some(task_id), json!({"message": message}));
            }
            // Success leaves the task `running` for the validator phase.
        }
        Ok(())
    }

    /// Manifest compliance + rescope for tasks that finished successfully.
    fn run_compliance_phase(
        &self,
        state: &mut RunState,
        catalog: &mut TaskCatalog,
        batch_id: u64,
        counters: &mut ComplianceCounters,
    ) -> Result<()> {
        let cfg = &self.ctx.config.compliance;

        for task_id in self.batch_tasks_with_status(state, batch_id, TaskStatus::Running) {
            let manifest = match catalog.get(&task_id) {
                Some(m) => m.clone(),
                None => continue,
            };
            let changed_files = state
                .task(&task_id)
                .map(|t| t.changed_files.clone())
                .unwrap_or_default();

            let outcome = compliance::run_compliance(
                &manifest,
                &changed_files,
                &self.resource_map,
                cfg.scope_mode,
                cfg.manifest_policy,
                cfg.policy_tier,
                self.services.events.as_ref(),
            )?;

            match outcome {
                ComplianceOutcome::Skipped | ComplianceOutcome::Passed => {}
                ComplianceOutcome::Warned { .. } => {
                    counters.warn_count += 1;
                }
                ComplianceOutcome::Rescoped { manifest: widened } => {
                    counters.block_count += 1;
                    self.write_rescoped_manifest(catalog, &widened)?;
                    catalog.replace_manifest(widened)?;
                    transitions::reset_task_to_pending(state, &task_id, "rescoped")?;
                    self.services
                        .events
                        .log("task.rescope.updated", Some(&task_id), json!({}));
                    self.services
                        .events
                        .log("task.reset", Some(&task_id), json!({"reason": "rescoped"}));
                }
                ComplianceOutcome::RescopeFailed { reason } => {
                    counters.block_count += 1;
                    transitions::mark_task_rescope_required(state, &task_id, &reason)?;
                }
            }
        }
        Ok(())
    }

    fn write_rescoped_manifest(
        &self,
        catalog: &TaskCatalog,
        manifest: &crate::manifest::model::TaskManifest,
    ) -> Result<()> {
        let path = catalog.manifest_path(&manifest.id);
        let rendered = toml::to_string_pretty(manifest)
            .map_err(|e| crate::errors::SwarmdagError::CatalogError(e.to_string()))?;
        fs::write(&path, rendered)?;
        info!(task = %manifest.id, path = ?path, "wrote rescoped manifest");
        Ok(())
    }

    fn emit_blast_radius(&self, state: &RunState, batch_id: u64) {
        if !self.ctx.paths.model_path().is_file() {
            return;
        }
        for task_id in self.batch_tasks_with_status(state, batch_id, TaskStatus::Running) {
            let changed = state
                .task(&task_id)
                .map(|t| t.changed_files.len())
                .unwrap_or(0);
            self.services.events.log(
                "task.blast_radius",
                Some(&task_id),
                json!({"changed_files": changed}),
            );
        }
    }

    /// Test, style and architecture validators for surviving tasks.
    async fn run_validators(&self, state: &mut RunState, batch_id: u64) -> Result<()> {
        let validators = &self.ctx.config.validators;
        let enabled: Vec<ValidatorKind> = [
            (ValidatorKind::Test, validators.test.as_str()),
            (ValidatorKind::Style, validators.style.as_str()),
            (ValidatorKind::Architecture, validators.architecture.as_str()),
        ]
        .into_iter()
        .filter(|(_, cmd)| !cmd.trim().is_empty())
        .map(|(kind, _)| kind)
        .collect();

        if enabled.is_empty() {
            return Ok(());
        }

        let timeout = Duration::from_secs(self.ctx.config.doctor.timeout_secs);

        for task_id in self.batch_tasks_with_status(state, batch_id, TaskStatus::Running) {
            let cwd = state
                .task(&task_id)
                .and_then(|t| t.workspace.clone())
                .unwrap_or_else(|| self.ctx.paths.repo_path().to_path_buf());

            for kind in &enabled {
                let report = self
                    .services
                    .validators
                    .run(
                        *kind,
                        ValidatorParams {
                            cwd: cwd.clone(),
                            task_id: Some(task_id.clone()),
                            timeout,
                        },
                    )
                    .await?;

                transitions::record_validator_result(
                    state,
                    &task_id,
                    ValidatorResult {
                        kind: kind.as_str().to_string(),
                        pass: report.pass,
                        summary: report.summary.clone(),
                        recorded_at: chrono::Utc::now(),
                    },
                )?;

                if !report.pass {
                    match validators.mode {
                        ValidatorMode::Block => {
                            let reason =
                                format!("{} validator failed: {}", kind.as_str(), report.summary);
                            transitions::mark_task_needs_review(state, &task_id, &reason)?;
                            self.services.events.log(
                                "validator.block",
                                Some(&task_id),
                                json!({"kind": kind.as_str(), "summary": report.summary}),
                            );
                            break;
                        }
                        ValidatorMode::Warn => {
                            warn!(task = %task_id, kind = kind.as_str(), "validator failed (warn mode)");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge validated branches, run the integration doctor, write the
    /// ledger, clean up and close the batch.
    async fn merge_and_doctor(
        &self,
        state: &mut RunState,
        catalog: &TaskCatalog,
        store: &StateStore,
        batch_id: u64,
        validated: &[String],
    ) -> Result<Option<StopReason>> {
        let branches: Vec<(String, String)> = validated
            .iter()
            .map(|id| {
                let branch = state
                    .task(id)
                    .and_then(|t| t.branch.clone())
                    .unwrap_or_else(|| crate::engine::task::TaskEngine::branch_name(id));
                (id.clone(), branch)
            })
            .collect();

        self.services.events.log(
            "batch.merging",
            None,
            json!({"batch_id": batch_id, "branches": branches.len()}),
        );

        let merge = self
            .services
            .vcs
            .merge_task_branches(MergeRequest {
                repo_path: self.ctx.paths.repo_path().to_path_buf(),
                main_branch: state.main_branch.clone(),
                branches,
            })
            .await?;

        let merge_commit = match merge {
            MergeOutcome::Conflict {
                conflict,
                merge_commit,
            } => {
                self.services.events.log(
                    "batch.merge_conflict",
                    Some(&conflict.task_id),
                    json!({
                        "batch_id": batch_id,
                        "branch": &conflict.branch,
                        "message": &conflict.message,
                    }),
                );
                let summary = format!(
                    "merge conflict on branch '{}': {}",
                    conflict.branch, conflict.message
                );
                for task_id in validated {
                    transitions::mark_task_needs_review(state, task_id, &summary)?;
                }
                transitions::close_batch(state, batch_id, BatchStatus::Failed, merge_commit, None)?;
                store.save(state)?;
                return Ok(Some(StopReason::MergeConflict));
            }
            MergeOutcome::Clean { merge_commit } => merge_commit,
        };

        let doctor_passed = self.run_integration_doctor().await?;

        if !doctor_passed {
            self.services.events.log(
                "doctor.integration.fail",
                None,
                json!({"batch_id": batch_id, "merge_commit": &merge_commit}),
            );
            for task_id in validated {
                transitions::mark_task_needs_review(state, task_id, "integration doctor failed")?;
            }
            transitions::close_batch(
                state,
                batch_id,
                BatchStatus::Failed,
                Some(merge_commit),
                Some(false),
            )?;
            store.save(state)?;
            // A failing integration is suspicious enough to warrant a
            // doctor-validator canary regardless of cadence.
            self.run_doctor_canary().await;
            return Ok(Some(StopReason::IntegrationDoctorFailed));
        }

        for task_id in validated {
            transitions::mark_task_complete(state, task_id)?;
            self.services
                .events
                .log("task.complete", Some(task_id), json!({}));
        }

        self.write_ledger_entries(state, catalog, batch_id, &merge_commit);
        self.cleanup_batch(state, validated).await;

        transitions::close_batch(
            state,
            batch_id,
            BatchStatus::Complete,
            Some(merge_commit),
            Some(true),
        )?;
        store.save(state)?;
        self.services
            .events
            .log("batch.complete", None, json!({"batch_id": batch_id}));

        self.maybe_run_doctor_cadence(state).await;

        Ok(None)
    }

    async fn run_integration_doctor(&self) -> Result<bool> {
        let report = self
            .services
            .validators
            .run(
                ValidatorKind::Doctor,
                ValidatorParams {
                    cwd: self.ctx.paths.repo_path().to_path_buf(),
                    task_id: None,
                    timeout: Duration::from_secs(self.ctx.config.doctor.timeout_secs),
                },
            )
            .await?;
        Ok(report.pass)
    }

    /// Best-effort doctor validator pass; failures are events, not errors.
    async fn run_doctor_canary(&self) {
        match self.run_integration_doctor().await {
            Ok(pass) => {
                self.services
                    .events
                    .log("validator.doctor", None, json!({"pass": pass}));
            }
            Err(e) => {
                warn!(error = %e, "doctor canary errored");
            }
        }
    }

    async fn maybe_run_doctor_cadence(&self, state: &RunState) {
        let cadence = self.ctx.config.doctor.validator_cadence;
        if cadence == 0 {
            return;
        }
        let finished = state.finished_task_count();
        if finished > 0 && finished % cadence == 0 {
            info!(finished, cadence, "running doctor validator on cadence");
            self.run_doctor_canary().await;
        }
    }

    /// Ledger writes happen only after a doctor-passed merge, in task-id
    /// order. Failures are logged and left for the next run to retry.
    fn write_ledger_entries(
        &self,
        state: &RunState,
        catalog: &TaskCatalog,
        batch_id: u64,
        merge_commit: &str,
    ) {
        let batch_tasks = self.batch_task_ids(state, batch_id);
        self.services
            .events
            .log("ledger.write.start", None, json!({"batch_id": batch_id}));

        let mut entries = Vec::new();
        for task_id in batch_tasks {
            let task = match state.task(&task_id) {
                Some(t) if t.status.is_satisfied() => t,
                _ => continue,
            };
            let status = if task.status == TaskStatus::Skipped {
                LedgerEntryStatus::Skipped
            } else {
                LedgerEntryStatus::Complete
            };
            match recompute_fingerprint(catalog, &task_id) {
                Ok(fingerprint) => entries.push(LedgerEntry {
                    task_id: task_id.clone(),
                    status,
                    fingerprint,
                    merge_commit: merge_commit.to_string(),
                    integration_doctor_passed: true,
                    completed_at: task.completed_at.unwrap_or_else(chrono::Utc::now),
                    run_id: state.run_id.clone(),
                    source: "executor".to_string(),
                    updated_at: chrono::Utc::now(),
                }),
                Err(e) => {
                    self.services.events.log(
                        "ledger.write.error",
                        Some(&task_id),
                        json!({"message": e.to_string()}),
                    );
                }
            }
        }

        let count = entries.len();
        match self.ledger.upsert_all(entries) {
            Ok(()) => {
                self.services.events.log(
                    "ledger.write.complete",
                    None,
                    json!({"batch_id": batch_id, "entries": count}),
                );
            }
            Err(e) => {
                warn!(error = %e, "ledger write failed; next run will retry");
                self.services.events.log(
                    "ledger.write.error",
                    None,
                    json!({"message": e.to_string()}),
                );
            }
        }
    }

    /// Tear down worktrees and containers after a fully successful batch.
    async fn cleanup_batch(&self, state: &RunState, task_ids: &[String]) {
        if !self.ctx.config.run.cleanup_on_success {
            return;
        }
        for task_id in task_ids {
            let task = match state.task(task_id) {
                Some(t) => t,
                None => continue,
            };
            if let Some(workspace) = task.workspace.as_ref() {
                if let Err(e) = self
                    .services
                    .vcs
                    .remove_worktree(self.ctx.paths.repo_path(), workspace)
                    .await
                {
                    warn!(task = %task_id, error = %e, "worktree cleanup failed");
                }
            }
            if let Err(e) = self
                .services
                .worker
                .cleanup_task(task_id, task.container_id.as_deref())
                .await
            {
                warn!(task = %task_id, error = %e, "container cleanup failed");
            }
        }
    }

    fn batch_task_ids(&self, state: &RunState, batch_id: u64) -> Vec<String> {
        state
            .batches
            .iter()
            .find(|b| b.batch_id == batch_id)
            .map(|b| b.tasks.clone())
            .unwrap_or_default()
    }

    fn batch_tasks_with_status(
        &self,
        state: &RunState,
        batch_id: u64,
        status: TaskStatus,
    ) -> Vec<String> {
        self.batch_task_ids(state, batch_id)
            .into_iter()
            .filter(|id| state.task(id).map(|t| t.status == status).unwrap_or(false))
            .collect()
    }

    /// Batch status when nothing merged: failed if any task failed,
    /// otherwise complete (e.g. everything was rescoped back to pending).
    fn residual_batch_status(&self, state: &RunState, batch_id: u64) -> BatchStatus {
        let any_failed = self
            .batch_task_ids(state, batch_id)
            .iter()
            .any(|id| state.task(id).map(|t| t.status == TaskStatus::Failed).unwrap_or(false));
        if any_failed {
            BatchStatus::Failed
        } else {
            BatchStatus::Complete
        }
    }
}
