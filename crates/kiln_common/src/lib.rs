//! Shared foundational types used across the kiln build tool.
//!
//! This crate provides the content hash used for fingerprints and toolchain
//! identity, and the compilation unit type that flows through every stage.

#![warn(missing_docs)]

pub mod hash;
pub mod unit;

pub use hash::{ContentHash, ContentHasher};
pub use unit::CompilationUnit;
