// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task catalog error: {0}")]
    CatalogError(String),

    #[error("Cycle detected in task DAG: {0}")]
    DagCycle(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid state transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("State document error: {0}")]
    StateError(String),

    #[error("Unsupported state schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Resume blocked: {reason}")]
    ResumeBlocked { reason: String },

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("VCS error: {0}")]
    VcsError(String),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("Validator error: {0}")]
    ValidatorError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SwarmdagError>;
