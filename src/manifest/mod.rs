// src/manifest/mod.rs

//! Task manifests and the per-run task catalog.
//!
//! - [`model`] defines the TOML-backed manifest (`task.toml`) plus its
//!   normalized lock/file sets.
//! - [`catalog`] loads a directory of task manifests, applies subset
//!   filtering and validates the dependency DAG.
//! - [`fingerprint`] computes the content-addressed digest used by the
//!   cross-run ledger.

pub mod catalog;
pub mod fingerprint;
pub mod model;

pub use catalog::{load_catalog, TaskCatalog};
pub use fingerprint::{canonical_manifest_json, fingerprint_manifest, normalize_spec_bytes};
pub use model::{FilePatterns, LockSets, TaskManifest, VerifySection};
