// src/config/mod.rs

//! Project configuration loading and validation for swarmdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like enum values and glob patterns (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    BudgetMode, BudgetSection, ComplianceSection, DoctorSection, EnforcementPolicy, LockMode,
    OrchestratorConfig, ProjectSection, RawOrchestratorConfig, RunSection, ScopeMode,
    ValidatorMode, ValidatorsSection, WorkerSection,
};
