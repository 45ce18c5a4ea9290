// src/state/mod.rs

//! Persistent run state.
//!
//! - [`model`] defines the `RunState` document and its sub-records.
//! - [`transitions`] is the only write API for `RunState`; every mutation
//!   goes through a named transition function that enforces the status
//!   machine.
//! - [`store`] persists the document atomically (temp + rename + fsync).

pub mod model;
pub mod store;
pub mod transitions;

pub use model::{
    BatchState, BatchStatus, ComputedLocks, ControlPlaneSnapshot, RunState, RunStatus, TaskState,
    TaskStatus, UsageRecord, ValidatorResult, STATE_SCHEMA_VERSION,
};
pub use store::StateStore;
