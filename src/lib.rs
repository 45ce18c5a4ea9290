// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod ledger;
pub mod logging;
pub mod manifest;
pub mod ports;
pub mod sched;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::engine::paths::{home_dir, RunPaths};
use crate::engine::run::{resolve_run_id, RunEngine};
use crate::engine::{RunContext, RunResult, Services, StopController};
use crate::exec::{GitCli, LocalWorkerRunner, ShellValidatorRunner};
use crate::ports::events::JsonlEventLog;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config + catalog loading
/// - run-id resolution (new vs. resume)
/// - production adapters (git CLI, local worker runner, shell validators)
/// - the JSONL event log
/// - Ctrl-C handling
/// - the run engine
pub async fn run(args: CliArgs) -> Result<RunResult> {
    let config_path = PathBuf::from(&args.config);
    let config = load_and_validate(&config_path)?;

    let catalog_root = match args.tasks.as_ref() {
        Some(path) => PathBuf::from(path),
        None => default_catalog_root(&config_path),
    };

    let resume = args.resume.as_deref();
    let paths_probe = RunPaths::new(
        home_dir(),
        config.project.name.clone(),
        "probe",
        config.project.repo_path.clone(),
    );
    let (run_id, resume_requested) = resolve_run_id(&paths_probe.runs_dir(), resume)?;
    info!(run_id = %run_id, resume = resume_requested, "resolved run id");

    let paths = RunPaths::new(
        home_dir(),
        config.project.name.clone(),
        run_id.clone(),
        config.project.repo_path.clone(),
    );

    let events = Arc::new(
        JsonlEventLog::open(paths.events_path(), run_id.clone())
            .context("opening orchestrator event log")?,
    );

    let services = Services {
        vcs: Arc::new(GitCli::new()),
        worker: Arc::new(LocalWorkerRunner::new(config.worker.command.clone())),
        validators: Arc::new(ShellValidatorRunner::new(&config.validators, &config.doctor)),
        events,
    };

    let stop = StopController::new();

    // Ctrl-C → graceful stop at the next loop/batch boundary.
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            stop.trigger();
        });
    }

    let ctx = RunContext {
        run_id,
        config,
        paths,
        catalog_root,
        task_filter: args.tasks_filter.clone(),
        dry_run: args.dry_run,
    };

    let engine = RunEngine::prepare(ctx, services, stop, resume_requested).await?;
    let result = engine.run().await?;

    info!(
        run_id = %result.run_id,
        status = ?result.status,
        stopped = result.stopped.is_some(),
        "run finished"
    );
    Ok(result)
}

/// Default task catalog location: `tasks/` next to the config file.
fn default_catalog_root(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("tasks"),
        _ => PathBuf::from("tasks"),
    }
}
