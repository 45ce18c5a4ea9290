// src/config/validate.rs

use globset::Glob;

use crate::config::model::{OrchestratorConfig, RawOrchestratorConfig};
use crate::errors::{Result, SwarmdagError};

impl TryFrom<RawOrchestratorConfig> for OrchestratorConfig {
    type Error = SwarmdagError;

    fn try_from(raw: RawOrchestratorConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(OrchestratorConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawOrchestratorConfig) -> Result<()> {
    validate_project(cfg)?;
    validate_run(cfg)?;
    validate_doctor(cfg)?;
    validate_resources(cfg)?;
    Ok(())
}

fn validate_project(cfg: &RawOrchestratorConfig) -> Result<()> {
    if cfg.project.name.trim().is_empty() {
        return Err(SwarmdagError::ConfigError(
            "[project].name must be non-empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_run(cfg: &RawOrchestratorConfig) -> Result<()> {
    if cfg.run.max_parallel == 0 {
        return Err(SwarmdagError::ConfigError(
            "[run].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_doctor(cfg: &RawOrchestratorConfig) -> Result<()> {
    if cfg.doctor.command.trim().is_empty() {
        return Err(SwarmdagError::ConfigError(
            "[doctor].command must be non-empty".to_string(),
        ));
    }
    if cfg.doctor.timeout_secs == 0 {
        return Err(SwarmdagError::ConfigError(
            "[doctor].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_resources(cfg: &RawOrchestratorConfig) -> Result<()> {
    for (resource, patterns) in cfg.resources.iter() {
        if resource.trim().is_empty() {
            return Err(SwarmdagError::ConfigError(
                "[resources] contains an empty resource name".to_string(),
            ));
        }
        for pattern in patterns {
            Glob::new(pattern).map_err(|e| {
                SwarmdagError::ConfigError(format!(
                    "invalid glob '{}' for resource '{}': {}",
                    pattern, resource, e
                ))
            })?;
        }
    }
    Ok(())
}
