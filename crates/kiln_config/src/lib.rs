//! Parsing and validation of `kiln.toml` project configuration files.
//!
//! This crate reads the optional project configuration file and produces a
//! strongly-typed [`KilnConfig`], then resolves it against a project directory
//! into a [`ResolvedBuild`] with absolute paths and a toolchain identity.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{find_config, load_config, load_config_from_str, CONFIG_FILE};
pub use resolve::{resolve_build, ResolvedBuild, Toolchain};
pub use types::*;
