// src/manifest/catalog.rs

//! Loading and validating the per-run task catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::errors::{Result, SwarmdagError};
use crate::manifest::model::TaskManifest;

/// The set of tasks participating in a run.
///
/// Immutable per run except through the rescope pipeline, which replaces a
/// single manifest via [`TaskCatalog::replace_manifest`].
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    root: PathBuf,
    tasks: BTreeMap<String, TaskManifest>,
}

impl TaskCatalog {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TaskManifest> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Task ids in lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn manifests(&self) -> impl Iterator<Item = &TaskManifest> {
        self.tasks.values()
    }

    /// Directory holding a task's manifest and spec document.
    pub fn task_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Path to a task's on-disk manifest.
    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.task_dir(id).join("task.toml")
    }

    /// Path to a task's spec document.
    pub fn spec_path(&self, id: &str) -> PathBuf {
        self.task_dir(id).join("spec.md")
    }

    /// Swap the in-memory manifest for a task (rescope).
    ///
    /// The id must already exist in the catalog and must not change.
    pub fn replace_manifest(&mut self, manifest: TaskManifest) -> Result<()> {
        if !self.tasks.contains_key(&manifest.id) {
            return Err(SwarmdagError::TaskNotFound(manifest.id));
        }
        self.tasks.insert(manifest.id.clone(), manifest);
        Ok(())
    }
}

/// Load the task catalog from a directory of `tasks/<id>/task.toml` files.
///
/// - `subset`, when non-empty, restricts the catalog to the named tasks.
///   Dependencies pointing outside the subset are kept in the manifests and
///   resolved against the ledger at run time.
/// - Errors on duplicate ids, id/directory mismatches, self-conflicting
///   lock sets, and dependency cycles.
pub fn load_catalog(root: impl AsRef<Path>, subset: &[String]) -> Result<TaskCatalog> {
    let root = root.as_ref().to_path_buf();
    let mut tasks = BTreeMap::new();

    let entries = fs::read_dir(&root).map_err(|e| {
        SwarmdagError::CatalogError(format!("reading task catalog at {:?}: {}", root, e))
    })?;

    for entry in entries {
        let entry = entry?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let manifest_path = dir.join("task.toml");
        if !manifest_path.is_file() {
            debug!(dir = ?dir, "skipping directory without task.toml");
            continue;
        }

        let manifest = load_manifest(&manifest_path)?;

        let dir_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if manifest.id != dir_name {
            return Err(SwarmdagError::CatalogError(format!(
                "task id '{}' does not match its directory name '{}'",
                manifest.id, dir_name
            )));
        }

        if manifest.has_self_conflict() {
            return Err(SwarmdagError::CatalogError(format!(
                "task '{}' declares a resource in both reads and writes",
                manifest.id
            )));
        }

        if tasks.insert(manifest.id.clone(), manifest).is_some() {
            return Err(SwarmdagError::CatalogError(format!(
                "duplicate task id '{}' in catalog",
                dir_name
            )));
        }
    }

    if !subset.is_empty() {
        let before = tasks.len();
        for requested in subset {
            if !tasks.contains_key(requested) {
                return Err(SwarmdagError::TaskNotFound(requested.clone()));
            }
        }
        tasks.retain(|id, _| subset.iter().any(|s| s == id));
        debug!(
            before,
            after = tasks.len(),
            "filtered task catalog to requested subset"
        );
    }

    validate_dag(&tasks)?;

    Ok(TaskCatalog { root, tasks })
}

/// Parse a single `task.toml`.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<TaskManifest> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        SwarmdagError::CatalogError(format!("reading manifest {:?}: {}", path, e))
    })?;
    let manifest: TaskManifest = toml::from_str(&contents)?;

    if manifest.id.trim().is_empty() {
        return Err(SwarmdagError::CatalogError(format!(
            "manifest {:?} has an empty id",
            path
        )));
    }

    Ok(manifest)
}

/// Validate that in-catalog dependencies form a DAG.
///
/// Dependencies that are not present in the catalog are allowed here (the
/// run engine resolves them against the ledger); they simply do not take
/// part in the cycle check.
fn validate_dag(tasks: &BTreeMap<String, TaskManifest>) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in tasks.keys() {
        graph.add_node(id.as_str());
    }

    for (id, manifest) in tasks.iter() {
        if manifest.dependencies.iter().any(|d| d == id) {
            return Err(SwarmdagError::CatalogError(format!(
                "task '{}' cannot depend on itself",
                id
            )));
        }
        for dep in manifest.dependencies.iter() {
            match tasks.get(dep) {
                Some(_) => {
                    graph.add_edge(dep.as_str(), id.as_str(), ());
                }
                None => {
                    warn!(
                        task = %id,
                        dep = %dep,
                        "dependency not in catalog; deferring to ledger resolution"
                    );
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(SwarmdagError::DagCycle(format!(
                "cycle detected in task DAG involving task '{}'",
                node
            )))
        }
    }
}
