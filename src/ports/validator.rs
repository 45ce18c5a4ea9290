// src/ports/validator.rs

//! Validator port.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

/// The validator kinds the batch engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    Test,
    Style,
    Architecture,
    Doctor,
}

impl ValidatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorKind::Test => "test",
            ValidatorKind::Style => "style",
            ValidatorKind::Architecture => "architecture",
            ValidatorKind::Doctor => "doctor",
        }
    }
}

/// Invocation parameters shared by all validator kinds.
#[derive(Debug, Clone)]
pub struct ValidatorParams {
    /// Directory the validator command runs in.
    pub cwd: PathBuf,
    /// Task under validation, when task-scoped.
    pub task_id: Option<String>,
    pub timeout: Duration,
}

/// What a validator reported.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub pass: bool,
    pub summary: String,
    pub details: Option<serde_json::Value>,
}

#[async_trait]
pub trait ValidatorRunner: Send + Sync {
    async fn run(&self, kind: ValidatorKind, params: ValidatorParams) -> Result<ValidationReport>;
}
