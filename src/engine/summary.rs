// src/engine/summary.rs

//! Final run summary report.
//!
//! Written to `<repo>/.swarmdag/runs/<run_id>/summary.json` when the run
//! finishes or stops. The summary is a human-and-tool-readable digest of
//! the persisted state; `state.json` remains the source of truth.

use std::fs;
use std::path::PathBuf;

use serde_json::json;
use tracing::info;

use crate::engine::batch::ComplianceCounters;
use crate::engine::RunContext;
use crate::errors::Result;
use crate::state::model::RunState;

pub fn write_summary(
    ctx: &RunContext,
    state: &RunState,
    counters: &ComplianceCounters,
) -> Result<PathBuf> {
    let tasks: Vec<serde_json::Value> = state
        .tasks
        .iter()
        .map(|(id, task)| {
            json!({
                "id": id,
                "status": task.status.as_str(),
                "attempts": task.attempts,
                "batch_id": task.batch_id,
                "tokens_used": task.tokens_used,
                "estimated_cost": task.estimated_cost,
                "last_error": &task.last_error,
            })
        })
        .collect();

    let batches: Vec<serde_json::Value> = state
        .batches
        .iter()
        .map(|batch| {
            json!({
                "batch_id": batch.batch_id,
                "status": format!("{:?}", batch.status).to_lowercase(),
                "tasks": &batch.tasks,
                "merge_commit": &batch.merge_commit,
                "integration_doctor_passed": batch.integration_doctor_passed,
            })
        })
        .collect();

    let summary = json!({
        "run_id": &state.run_id,
        "project": &state.project,
        "status": format!("{:?}", state.status).to_lowercase(),
        "started_at": state.started_at.to_rfc3339(),
        "updated_at": state.updated_at.to_rfc3339(),
        "tokens_used": state.tokens_used,
        "estimated_cost": state.estimated_cost,
        "compliance": {
            "warn_count": counters.warn_count,
            "block_count": counters.block_count,
        },
        "tasks": tasks,
        "batches": batches,
    });

    let path = ctx.paths.summary_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
    info!(path = ?path, "wrote run summary");
    Ok(path)
}
