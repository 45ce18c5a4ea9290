// src/exec/validators.rs

//! Shell-command validator runner.
//!
//! Each validator kind maps to a configured shell command; an empty command
//! means the kind is disabled and trivially passes. Commands run with a
//! wall-clock timeout and their exit code is captured rather than raised,
//! so a failing check surfaces as `pass = false`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::model::{DoctorSection, ValidatorsSection};
use crate::errors::{Result, SwarmdagError};
use crate::ports::validator::{ValidationReport, ValidatorKind, ValidatorParams, ValidatorRunner};

/// Runs configured validator commands via `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellValidatorRunner {
    test: String,
    style: String,
    architecture: String,
    doctor: String,
}

impl ShellValidatorRunner {
    pub fn new(validators: &ValidatorsSection, doctor: &DoctorSection) -> Self {
        Self {
            test: validators.test.clone(),
            style: validators.style.clone(),
            architecture: validators.architecture.clone(),
            doctor: doctor.command.clone(),
        }
    }

    fn command_for(&self, kind: ValidatorKind) -> &str {
        match kind {
            ValidatorKind::Test => &self.test,
            ValidatorKind::Style => &self.style,
            ValidatorKind::Architecture => &self.architecture,
            ValidatorKind::Doctor => &self.doctor,
        }
    }
}

#[async_trait]
impl ValidatorRunner for ShellValidatorRunner {
    async fn run(&self, kind: ValidatorKind, params: ValidatorParams) -> Result<ValidationReport> {
        let command = self.command_for(kind).trim().to_string();
        if command.is_empty() {
            debug!(kind = kind.as_str(), "validator disabled; passing");
            return Ok(ValidationReport {
                pass: true,
                summary: "disabled".to_string(),
                details: None,
            });
        }

        info!(kind = kind.as_str(), cwd = ?params.cwd, cmd = %command, "running validator");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&params.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SwarmdagError::ValidatorError(format!(
                    "spawning {} validator: {}",
                    kind.as_str(),
                    e
                ))
            })?;

        let output = match timeout(params.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                SwarmdagError::ValidatorError(format!(
                    "waiting for {} validator: {}",
                    kind.as_str(),
                    e
                ))
            })?,
            Err(_elapsed) => {
                warn!(kind = kind.as_str(), timeout = ?params.timeout, "validator timed out");
                return Ok(ValidationReport {
                    pass: false,
                    summary: format!(
                        "{} validator timed out after {}s",
                        kind.as_str(),
                        params.timeout.as_secs()
                    ),
                    details: None,
                });
            }
        };

        let pass = output.status.success();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let summary = if pass {
            format!("{} validator passed", kind.as_str())
        } else {
            format!(
                "{} validator failed (exit {}): {}",
                kind.as_str(),
                output.status.code().unwrap_or(-1),
                stderr.lines().last().unwrap_or("").trim()
            )
        };

        Ok(ValidationReport {
            pass,
            summary,
            details: Some(serde_json::json!({
                "exit_code": output.status.code(),
                "task_id": params.task_id,
            })),
        })
    }
}
