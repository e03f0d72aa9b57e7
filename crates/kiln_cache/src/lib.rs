//! Incremental build state.
//!
//! This crate fingerprints source files, persists the fingerprints of units
//! from the last successful build, and decides which units are stale. Updates
//! are staged in memory and only reach disk when the whole build succeeds.

#![warn(missing_docs)]

pub mod error;
pub mod hasher;
pub mod store;
pub mod tracker;

pub use error::CacheError;
pub use hasher::{Fingerprint, FingerprintMode, SourceHasher};
pub use store::{write_atomic, FingerprintStore};
pub use tracker::{StaleReason, Staleness, StalenessTracker, UnitCheck};
