// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{OrchestratorConfig, RawOrchestratorConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawOrchestratorConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (enum sanity, glob patterns, etc.). Use [`load_and_validate`]
/// for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawOrchestratorConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawOrchestratorConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - `max_parallel >= 1`,
///   - non-empty project name and doctor command,
///   - resource patterns compiling as globs.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<OrchestratorConfig> {
    let raw = load_from_path(&path)?;
    let config = OrchestratorConfig::try_from(raw)?;
    Ok(config)
}

/// Helper to resolve a default config path.
///
/// Currently this just returns `Swarmdag.toml` in the current working
/// directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Swarmdag.toml")
}
