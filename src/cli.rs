// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `swarmdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "swarmdag",
    version,
    about = "Run batches of agent tasks against a git repository.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project config file (TOML).
    ///
    /// Default: `Swarmdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Swarmdag.toml")]
    pub config: String,

    /// Path to the task catalog directory.
    ///
    /// Default: `tasks/` next to the config file.
    #[arg(long, value_name = "PATH")]
    pub tasks: Option<String>,

    /// Resume an existing run instead of starting a new one.
    ///
    /// With a value, resumes that run id; without, resumes the latest run
    /// for the project.
    #[arg(long, value_name = "RUN_ID", num_args = 0..=1, default_missing_value = "")]
    pub resume: Option<String>,

    /// Run only these tasks (repeatable). Dependencies outside the subset
    /// are resolved against the ledger at run time.
    #[arg(long = "task", value_name = "ID")]
    pub tasks_filter: Vec<String>,

    /// Plan batches and mark tasks skipped without launching workers.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SWARMDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
