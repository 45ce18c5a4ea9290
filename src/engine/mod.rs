// src/engine/mod.rs

//! Orchestration engine.
//!
//! The run engine owns `RunState` and drives the loop:
//! schedule a batch, fan out task attempts, finalize the batch (compliance,
//! validators, merge, integration doctor, ledger), persist, repeat.
//!
//! Composition is one-directional: the run engine constructs the task and
//! batch engines and hands them the shared [`RunContext`] and [`Services`];
//! neither of them calls back into the run engine.

pub mod batch;
pub mod budget;
pub mod compliance;
pub mod paths;
pub mod run;
pub mod summary;
pub mod task;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::ports::events::EventSink;
use crate::ports::validator::ValidatorRunner;
use crate::ports::vcs::Vcs;
use crate::ports::worker::WorkerRunner;
use crate::state::model::RunStatus;

pub use paths::RunPaths;
pub use run::RunEngine;

/// Why the run stopped before draining the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    MergeConflict,
    IntegrationDoctorFailed,
    BudgetBlock,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Signal => "signal",
            StopReason::MergeConflict => "merge_conflict",
            StopReason::IntegrationDoctorFailed => "integration_doctor_failed",
            StopReason::BudgetBlock => "budget_block",
        }
    }
}

/// Descriptor attached to a stopped run.
#[derive(Debug, Clone)]
pub struct StopDescriptor {
    pub reason: StopReason,
    /// "stopped" or "left_running".
    pub containers: &'static str,
    pub stop_containers_requested: bool,
    pub stopped_containers: Vec<String>,
    pub stop_errors: Vec<String>,
}

/// What the engine hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// The batches this run planned, in execution order.
    pub plan: Vec<crate::state::model::BatchState>,
    pub stopped: Option<StopDescriptor>,
}

/// Level-triggered stop signal observed at loop and batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopController {
    token: CancellationToken,
}

impl StopController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// The ports the engine talks through, injected at construction.
#[derive(Clone)]
pub struct Services {
    pub vcs: Arc<dyn Vcs>,
    pub worker: Arc<dyn WorkerRunner>,
    pub validators: Arc<dyn ValidatorRunner>,
    pub events: Arc<dyn EventSink>,
}

/// Frozen per-run context built once at run start.
///
/// Components receive this by `Arc`; nothing in it changes during the run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub config: OrchestratorConfig,
    pub paths: RunPaths,
    /// Root of the on-disk task catalog (`tasks/<id>/...`).
    pub catalog_root: std::path::PathBuf,
    /// Restrict the run to these task ids (empty = whole catalog).
    pub task_filter: Vec<String>,
    pub dry_run: bool,
}
