// tests/common/mod.rs

//! Shared harness for engine integration tests.
//!
//! A [`TestEnv`] owns temp directories for the orchestrator home, the repo
//! and the task catalog, plus the fake ports. Multiple engine runs against
//! the same env share the fake git history and the on-disk ledger, which is
//! what the reuse and resume scenarios need.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use swarmdag::config::OrchestratorConfig;
use swarmdag::engine::paths::RunPaths;
use swarmdag::engine::run::RunEngine;
use swarmdag::engine::{RunContext, RunResult, Services, StopController};
use swarmdag::errors::Result;
use swarmdag::ledger::model::Ledger;
use swarmdag::ledger::store::LedgerStore;
use swarmdag::state::model::RunState;
use swarmdag::state::store::StateStore;

use swarmdag_test_utils::builders::{CatalogBuilder, ConfigBuilder};
use swarmdag_test_utils::fakes::{
    FakeValidatorRunner, FakeVcs, FakeWorkerRunner, MemoryEventSink,
};

pub use swarmdag_test_utils::builders::TaskSpecBuilder;
pub use swarmdag_test_utils::init_tracing;

pub struct TestEnv {
    pub home: TempDir,
    pub repo: TempDir,
    pub catalog_dir: TempDir,
    pub config: OrchestratorConfig,
    pub vcs: Arc<FakeVcs>,
    pub worker: Arc<FakeWorkerRunner>,
    pub validators: Arc<FakeValidatorRunner>,
    pub events: Arc<MemoryEventSink>,
    pub stop: StopController,
}

impl TestEnv {
    /// Build an env from a catalog and a config customization.
    pub fn new(
        catalog: CatalogBuilder,
        configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
    ) -> Self {
        init_tracing();

        let home = TempDir::new().expect("home tempdir");
        let repo = TempDir::new().expect("repo tempdir");
        let catalog_dir = TempDir::new().expect("catalog tempdir");
        catalog.write(catalog_dir.path());

        let config = configure(ConfigBuilder::new("demo", repo.path())).build();

        Self {
            home,
            repo,
            catalog_dir,
            config,
            vcs: Arc::new(FakeVcs::new()),
            worker: Arc::new(FakeWorkerRunner::new()),
            validators: Arc::new(FakeValidatorRunner::new()),
            events: Arc::new(MemoryEventSink::new()),
            stop: StopController::new(),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            vcs: self.vcs.clone(),
            worker: self.worker.clone(),
            validators: self.validators.clone(),
            events: self.events.clone(),
        }
    }

    pub fn paths(&self, run_id: &str) -> RunPaths {
        RunPaths::new(
            self.home.path().to_path_buf(),
            "demo",
            run_id,
            self.repo.path().to_path_buf(),
        )
    }

    pub fn ctx(&self, run_id: &str) -> RunContext {
        self.ctx_with(run_id, false)
    }

    pub fn ctx_with(&self, run_id: &str, dry_run: bool) -> RunContext {
        RunContext {
            run_id: run_id.to_string(),
            config: self.config.clone(),
            paths: self.paths(run_id),
            catalog_root: self.catalog_dir.path().to_path_buf(),
            task_filter: Vec::new(),
            dry_run,
        }
    }

    pub async fn prepare(&self, run_id: &str, resume: bool) -> Result<RunEngine> {
        RunEngine::prepare(self.ctx(run_id), self.services(), self.stop.clone(), resume).await
    }

    /// Prepare and drive a fresh run to its end.
    pub async fn run_to_end(&self, run_id: &str) -> Result<RunResult> {
        let engine = self.prepare(run_id, false).await?;
        engine.run().await
    }

    /// Resume an existing run and drive it to its end.
    pub async fn resume_to_end(&self, run_id: &str) -> Result<RunResult> {
        let engine = self.prepare(run_id, true).await?;
        engine.run().await
    }

    pub fn state_store(&self, run_id: &str) -> StateStore {
        StateStore::new(self.paths(run_id).run_dir())
    }

    pub fn load_state(&self, run_id: &str) -> RunState {
        self.state_store(run_id).load().expect("load persisted state")
    }

    pub fn ledger(&self) -> Option<Ledger> {
        LedgerStore::new(self.paths("probe").project_dir())
            .load()
            .expect("load ledger")
    }

    pub fn manifest_path(&self, task_id: &str) -> PathBuf {
        self.catalog_dir.path().join(task_id).join("task.toml")
    }
}
