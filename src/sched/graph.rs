// src/sched/graph.rs

use std::collections::HashMap;

use crate::manifest::TaskCatalog;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct TaskNode {
    /// Direct dependencies: tasks that must complete before this one runs.
    deps: Vec<String>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
}

/// Simple in-memory DAG representation keyed by task id.
///
/// Acyclicity is already validated at catalog load, so here we just keep
/// adjacency information for scheduling and diagnostics. Dependencies that
/// point outside the catalog are kept in `deps` (the run engine resolves
/// them against the ledger) but have no node of their own.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<String, TaskNode>,
}

impl TaskGraph {
    /// Build a graph from a validated [`TaskCatalog`].
    pub fn from_catalog(catalog: &TaskCatalog) -> Self {
        let mut nodes: HashMap<String, TaskNode> = HashMap::new();

        for manifest in catalog.manifests() {
            nodes.insert(
                manifest.id.clone(),
                TaskNode {
                    deps: manifest.dependencies.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        let ids: Vec<String> = nodes.keys().cloned().collect();
        for id in ids {
            let deps = nodes
                .get(&id)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(id.clone());
                }
            }
        }

        Self { nodes }
    }

    /// Return all task ids.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
