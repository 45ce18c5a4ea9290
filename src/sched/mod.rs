// src/sched/mod.rs

//! Batch scheduling.
//!
//! - [`graph`] keeps adjacency information for the task DAG.
//! - [`locks`] derives effective per-task read/write lock sets.
//! - [`scheduler`] computes topological readiness and packs greedy,
//!   lock-disjoint batches.
//! - [`blockage`] classifies why no task is ready (operator-blocked vs
//!   genuinely failed).
//!
//! Everything here is pure and synchronous; the run engine supplies the
//! inputs and acts on the outputs.

pub mod blockage;
pub mod graph;
pub mod locks;
pub mod scheduler;

pub use blockage::{classify_blockage, Blockage};
pub use graph::TaskGraph;
pub use locks::{LockResolver, ScopeReport, TaskLocks};
pub use scheduler::{plan_batch, topological_ready, BatchPlan};
