// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level project configuration as read from `Swarmdag.toml`.
///
/// ```toml
/// [project]
/// name = "demo"
/// repo_path = "."
/// main_branch = "main"
///
/// [run]
/// max_parallel = 4
/// lock_mode = "declared"
///
/// [doctor]
/// command = "make check"
/// timeout_secs = 600
/// ```
///
/// This raw form is deserialized as-is; semantic validation happens in
/// [`crate::config::validate`] when converting to [`OrchestratorConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrchestratorConfig {
    pub project: ProjectSection,

    #[serde(default)]
    pub run: RunSection,

    pub doctor: DoctorSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub compliance: ComplianceSection,

    #[serde(default)]
    pub budget: BudgetSection,

    #[serde(default)]
    pub validators: ValidatorsSection,

    /// `[resources]`: resource name -> file glob patterns owned by that
    /// resource. Consumed by the compliance pipeline and derived lock mode.
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<String>>,
}

/// Validated configuration used by the rest of the crate.
///
/// Construct via `OrchestratorConfig::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub project: ProjectSection,
    pub run: RunSection,
    pub doctor: DoctorSection,
    pub worker: WorkerSection,
    pub compliance: ComplianceSection,
    pub budget: BudgetSection,
    pub validators: ValidatorsSection,
    pub resources: BTreeMap<String, Vec<String>>,
}

impl OrchestratorConfig {
    /// Internal constructor used by validation; does not re-check invariants.
    pub(crate) fn new_unchecked(raw: RawOrchestratorConfig) -> Self {
        Self {
            project: raw.project,
            run: raw.run,
            doctor: raw.doctor,
            worker: raw.worker,
            compliance: raw.compliance,
            budget: raw.budget,
            validators: raw.validators,
            resources: raw.resources,
        }
    }
}

/// `[project]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSection {
    /// Project name; keys run directories and the ledger.
    pub name: String,

    /// Path to the git repository the run operates on.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    /// Integration branch that task branches are merged into.
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_main_branch() -> String {
    "main".to_string()
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    /// Maximum number of tasks admitted into one batch.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// How per-task lock sets are resolved.
    #[serde(default)]
    pub lock_mode: LockMode,

    /// Seed completed tasks from the cross-run ledger when eligible.
    #[serde(default = "default_true")]
    pub reuse: bool,

    /// Tear down task worktrees after a successful integration doctor.
    #[serde(default)]
    pub cleanup_on_success: bool,

    /// On stop, ask the worker runner to terminate active containers.
    #[serde(default)]
    pub stop_containers_on_exit: bool,
}

fn default_max_parallel() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            lock_mode: LockMode::default(),
            reuse: true,
            cleanup_on_success: false,
            stop_containers_on_exit: false,
        }
    }
}

/// How effective per-task read/write lock sets are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Use the locks declared in each task manifest.
    Declared,
    /// Use the task's derived scope report where one exists.
    Derived,
    /// Serialization disabled; all lock sets are empty.
    Off,
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::Declared
    }
}

/// `[doctor]` section: the project's end-to-end integration check.
#[derive(Debug, Clone, Deserialize)]
pub struct DoctorSection {
    /// Shell command run in the main repo after each merged batch.
    pub command: String,

    /// Wall-clock timeout for the doctor command.
    #[serde(default = "default_doctor_timeout")]
    pub timeout_secs: u64,

    /// Run the doctor validator every N finished tasks (0 = disabled).
    #[serde(default)]
    pub validator_cadence: usize,
}

fn default_doctor_timeout() -> u64 {
    600
}

/// `[worker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Worker command launched for each task attempt.
    #[serde(default = "default_worker_command")]
    pub command: String,

    /// Build the worker image during run-start bootstrap.
    #[serde(default)]
    pub build_image: bool,

    /// Mock mode: do not expose worker credentials.
    #[serde(default)]
    pub mock: bool,

    /// Worker-side retry limit per attempt.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Ask workers to emit checkpoint commits.
    #[serde(default = "default_true")]
    pub checkpoint: bool,
}

fn default_worker_command() -> String {
    "swarm-worker".to_string()
}

fn default_retry_limit() -> u32 {
    1
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            build_image: false,
            mock: false,
            retry_limit: default_retry_limit(),
            checkpoint: true,
        }
    }
}

/// `[compliance]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ComplianceSection {
    #[serde(default)]
    pub scope_mode: ScopeMode,

    #[serde(default)]
    pub manifest_policy: EnforcementPolicy,

    /// Policy tier; tier >= 2 tightens the effective policy to `block`.
    #[serde(default)]
    pub policy_tier: u8,

    /// Resource unioned into derived writes when a scope report has low
    /// confidence. Empty = no fallback.
    #[serde(default)]
    pub fallback_resource: String,
}

/// Scope compliance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    Off,
    Observe,
    Enforce,
}

impl Default for ScopeMode {
    fn default() -> Self {
        ScopeMode::Observe
    }
}

/// Manifest enforcement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementPolicy {
    Off,
    Warn,
    Block,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        EnforcementPolicy::Warn
    }
}

/// `[budget]` section. Zero values mean "unlimited".
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BudgetSection {
    #[serde(default)]
    pub max_tokens_per_task: u64,

    #[serde(default)]
    pub max_tokens_per_run: u64,

    #[serde(default)]
    pub max_cost_per_run: f64,

    #[serde(default)]
    pub mode: BudgetMode,
}

/// What to do on a budget breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    Warn,
    Block,
}

impl Default for BudgetMode {
    fn default() -> Self {
        BudgetMode::Warn
    }
}

/// `[validators]` section. Empty commands disable the validator.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValidatorsSection {
    #[serde(default)]
    pub test: String,

    #[serde(default)]
    pub style: String,

    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub mode: ValidatorMode,
}

/// What a failing validator does to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    Warn,
    Block,
}

impl Default for ValidatorMode {
    fn default() -> Self {
        ValidatorMode::Block
    }
}
