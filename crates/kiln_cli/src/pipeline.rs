//! Shared helpers for CLI commands.
//!
//! Project root resolution, configuration lookup and directory setup used by
//! both `build` and `init`.

use std::path::{Path, PathBuf};

use kiln_config::{find_config, load_config, KilnConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is given it names either the config file (its parent is the
/// root) or the project directory. Otherwise the nearest ancestor of `cwd`
/// holding a `kiln.toml` is used, falling back to `cwd` itself since the
/// config file is optional.
pub fn resolve_project_root(
    global: &GlobalArgs,
    cwd: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(path) => {
            let path = cwd.join(path);
            if path.is_file() {
                Ok(path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| cwd.to_path_buf()))
            } else if path.is_dir() {
                Ok(path)
            } else {
                Err(format!("config path {} does not exist", path.display()).into())
            }
        }
        None => Ok(find_project_root(cwd).unwrap_or_else(|| cwd.to_path_buf())),
    }
}

/// Loads the project configuration, or the defaults when there is no `kiln.toml`.
pub fn load_project_config(
    global: &GlobalArgs,
    cwd: &Path,
    project_dir: &Path,
) -> Result<KilnConfig, Box<dyn std::error::Error>> {
    let explicit = global
        .config
        .as_ref()
        .map(|p| cwd.join(p))
        .filter(|p| p.is_file());
    match explicit.or_else(|| find_config(project_dir)) {
        Some(path) => {
            tracing::debug!(config = %path.display(), "loading configuration");
            Ok(load_config(&path)?)
        }
        None => {
            tracing::debug!(dir = %project_dir.display(), "no kiln.toml, using defaults");
            Ok(KilnConfig::default())
        }
    }
}

/// Creates `dir` and its parents if they don't exist yet.
pub fn ensure_directory(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create directory {}: {e}", dir.display()))?;
    Ok(())
}
