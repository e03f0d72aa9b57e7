//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::{Path, PathBuf};

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Returns the path of `kiln.toml` in `project_dir`, if one exists.
pub fn find_config(project_dir: &Path) -> Option<PathBuf> {
    let path = project_dir.join(CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Loads and validates a `kiln.toml` configuration file.
pub fn load_config(path: &Path) -> Result<KilnConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that configuration values are usable.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    if config.toolchain.compiler.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "toolchain.compiler is empty".to_string(),
        ));
    }
    if config.toolchain.archiver.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "toolchain.archiver is empty".to_string(),
        ));
    }
    check_suffix("sources.suffix", &config.sources.suffix)?;
    check_suffix("toolchain.object_suffix", &config.toolchain.object_suffix)?;
    if config.sources.suffix == config.toolchain.object_suffix {
        return Err(ConfigError::ValidationError(format!(
            "sources.suffix and toolchain.object_suffix are both '{}'",
            config.sources.suffix
        )));
    }
    for pattern in config.sources.include.iter().chain(&config.sources.exclude) {
        if pattern.is_empty() || pattern.contains(['/', '\\']) {
            return Err(ConfigError::ValidationError(format!(
                "source pattern '{pattern}' must be a non-empty file name pattern"
            )));
        }
    }
    if config.build.timeout_secs == Some(0) {
        return Err(ConfigError::ValidationError(
            "build.timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// A suffix must be a dot followed by at least one character and no separators.
fn check_suffix(field: &str, suffix: &str) -> Result<(), ConfigError> {
    let valid = suffix.len() > 1 && suffix.starts_with('.') && !suffix.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{field} must start with '.' and name an extension, got '{suffix}'"
        )))
    }
}
