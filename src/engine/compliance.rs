// src/engine/compliance.rs

//! Post-attempt manifest compliance and rescope planning.
//!
//! After a successful attempt, the files the worker actually changed are
//! checked against the task's declared scope: a changed file must match one
//! of the manifest's write patterns, or belong to a resource the manifest
//! declares a write lock on. Out-of-scope changes are violations.
//!
//! In `enforce` mode with a `block` policy, a rescope plan widens the
//! manifest to cover the violations so the task can re-run with honest
//! locks; a plan that cannot produce a valid manifest parks the task in
//! `rescope_required`.

use std::collections::BTreeMap;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::model::{EnforcementPolicy, ScopeMode};
use crate::errors::{Result, SwarmdagError};
use crate::manifest::model::TaskManifest;
use crate::ports::events::EventSink;

/// Compiled resource -> file-pattern ownership map.
#[derive(Debug)]
pub struct ResourceMap {
    resources: Vec<(String, GlobSet)>,
}

impl ResourceMap {
    pub fn compile(resources: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut compiled = Vec::new();
        for (name, patterns) in resources {
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                builder.add(Glob::new(pattern).map_err(|e| {
                    SwarmdagError::ConfigError(format!(
                        "invalid glob '{}' for resource '{}': {}",
                        pattern, name, e
                    ))
                })?);
            }
            let set = builder.build().map_err(|e| {
                SwarmdagError::ConfigError(format!("compiling resource '{}': {}", name, e))
            })?;
            compiled.push((name.clone(), set));
        }
        Ok(Self { resources: compiled })
    }

    /// Resources whose patterns cover `path`.
    pub fn resources_for(&self, path: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, set)| set.is_match(path))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// One out-of-scope changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    /// Resources owning the path; empty when no resource covers it.
    pub resources: Vec<String>,
}

/// What the pipeline decided for one task.
#[derive(Debug)]
pub enum ComplianceOutcome {
    /// Compliance disabled, or nothing out of scope.
    Skipped,
    Passed,
    /// Violations recorded; task proceeds to validators.
    Warned { violations: Vec<Violation> },
    /// Manifest was widened; the task must go back to `pending`.
    Rescoped { manifest: TaskManifest },
    /// No valid widened manifest could be computed.
    RescopeFailed { reason: String },
}

/// Effective policy: scope off disables everything; tier >= 2 tightens to
/// `block`.
pub fn effective_policy(
    scope_mode: ScopeMode,
    manifest_policy: EnforcementPolicy,
    policy_tier: u8,
) -> EnforcementPolicy {
    if scope_mode == ScopeMode::Off {
        return EnforcementPolicy::Off;
    }
    if policy_tier >= 2 {
        return EnforcementPolicy::Block;
    }
    manifest_policy
}

/// Changed files not covered by the manifest's declared scope.
pub fn find_violations(
    manifest: &TaskManifest,
    changed_files: &[String],
    resource_map: &ResourceMap,
) -> Result<Vec<Violation>> {
    let write_globs = compile_patterns(&manifest.files.writes)?;
    let write_locks = manifest.write_locks();

    let mut violations = Vec::new();
    for path in changed_files {
        if write_globs.is_match(path) {
            continue;
        }
        let owners = resource_map.resources_for(path);
        if owners.iter().any(|r| write_locks.contains(*r)) {
            continue;
        }
        violations.push(Violation {
            path: path.clone(),
            resources: owners.into_iter().map(|s| s.to_string()).collect(),
        });
    }
    Ok(violations)
}

/// Widen a manifest to cover the violations.
///
/// Violated paths owned by resources add write locks; paths owned by no
/// resource add literal file write patterns. Returns `None` when the
/// widened manifest would be invalid (a new write lock collides with a
/// declared read lock).
pub fn build_rescope_plan(
    manifest: &TaskManifest,
    violations: &[Violation],
) -> Option<TaskManifest> {
    let mut widened = manifest.clone();

    for violation in violations {
        if violation.resources.is_empty() {
            if !widened.files.writes.iter().any(|p| p == &violation.path) {
                widened.files.writes.push(violation.path.clone());
            }
        } else {
            for resource in &violation.resources {
                if !widened.locks.writes.iter().any(|w| w == resource) {
                    widened.locks.writes.push(resource.clone());
                }
            }
        }
    }

    if widened.has_self_conflict() {
        return None;
    }
    Some(widened)
}

/// Run the compliance pipeline for one finished attempt.
pub fn run_compliance(
    manifest: &TaskManifest,
    changed_files: &[String],
    resource_map: &ResourceMap,
    scope_mode: ScopeMode,
    manifest_policy: EnforcementPolicy,
    policy_tier: u8,
    events: &dyn EventSink,
) -> Result<ComplianceOutcome> {
    let policy = effective_policy(scope_mode, manifest_policy, policy_tier);
    let task_id = manifest.id.as_str();

    if policy == EnforcementPolicy::Off {
        events.log("manifest.compliance.skip", Some(task_id), json!({}));
        return Ok(ComplianceOutcome::Skipped);
    }

    let violations = find_violations(manifest, changed_files, resource_map)?;
    if violations.is_empty() {
        events.log("manifest.compliance.pass", Some(task_id), json!({}));
        return Ok(ComplianceOutcome::Passed);
    }

    for violation in &violations {
        events.log(
            "access.requested",
            Some(task_id),
            json!({
                "path": &violation.path,
                "resources": &violation.resources,
            }),
        );
    }

    match policy {
        EnforcementPolicy::Off => unreachable!("handled above"),
        EnforcementPolicy::Warn => {
            warn!(task = %task_id, count = violations.len(), "out-of-scope changes (warn)");
            events.log(
                "manifest.compliance.warn",
                Some(task_id),
                json!({"violations": violations.len()}),
            );
            Ok(ComplianceOutcome::Warned { violations })
        }
        EnforcementPolicy::Block => {
            events.log(
                "manifest.compliance.block",
                Some(task_id),
                json!({"violations": violations.len()}),
            );

            if scope_mode != ScopeMode::Enforce {
                // Observe mode records the block but does not rescope.
                return Ok(ComplianceOutcome::Warned { violations });
            }

            events.log("task.rescope.start", Some(task_id), json!({}));
            match build_rescope_plan(manifest, &violations) {
                Some(widened) => {
                    debug!(task = %task_id, "rescope plan widens manifest");
                    Ok(ComplianceOutcome::Rescoped { manifest: widened })
                }
                None => {
                    let reason = "widened manifest would conflict with declared reads".to_string();
                    events.log(
                        "task.rescope.failed",
                        Some(task_id),
                        json!({"reason": reason}),
                    );
                    Ok(ComplianceOutcome::RescopeFailed { reason })
                }
            }
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| SwarmdagError::CatalogError(format!("invalid glob '{pattern}': {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| SwarmdagError::CatalogError(format!("compiling file patterns: {e}")))
}
