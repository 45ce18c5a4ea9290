// src/ledger/mod.rs

//! Cross-run task ledger.
//!
//! The ledger records, per project, which tasks have been completed by past
//! runs, keyed by a content-addressed fingerprint and gated by merge-commit
//! reachability. It is owned by the project, not by any single run; all
//! mutations happen under a per-project advisory file lock.

pub mod model;
pub mod reuse;
pub mod store;

pub use model::{Ledger, LedgerEntry, LedgerEntryStatus};
pub use reuse::{eligible_entries, seed_from_ledger};
pub use store::{ImportOutcome, LedgerStore};
