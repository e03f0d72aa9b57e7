//! `kiln init`: project scaffolding command.
//!
//! Writes a starter `kiln.toml` into the project directory and creates the
//! source directory it points at.

use std::fs;
use std::path::Path;

use kiln_config::{resolve_build, KilnConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// Runs the `kiln init` command.
///
/// Initializes the directory named by `--config`, or the current directory.
/// Refuses to overwrite an existing `kiln.toml`. Returns exit code 0 on success.
pub fn run(name: Option<String>, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let project_dir = match &global.config {
        Some(path) => {
            let path = cwd.join(path);
            if path.file_name().is_some_and(|n| n == CONFIG_FILE) {
                path.parent().map(Path::to_path_buf).unwrap_or(cwd)
            } else {
                path
            }
        }
        None => cwd,
    };
    let written = init_project(&project_dir, name.as_deref())?;

    if !global.quiet {
        eprintln!("    Creating kiln project `{written}`");
        eprintln!(
            "     Created {}",
            project_dir.join(CONFIG_FILE).display()
        );
    }
    Ok(0)
}

/// Writes `kiln.toml` and `src/` into `project_dir`, returning the project name.
pub fn init_project(
    project_dir: &Path,
    name: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    let config_path = project_dir.join(CONFIG_FILE);
    if config_path.exists() {
        return Err(format!("`{}` already exists", config_path.display()).into());
    }

    let name = match name {
        Some(n) => n.to_string(),
        None => resolve_build(&KilnConfig::default(), project_dir).name,
    };
    validate_name(&name)?;

    fs::create_dir_all(project_dir.join("src"))?;
    fs::write(&config_path, starter_config(&name))?;
    Ok(name)
}

/// Accepts names that are usable as a library file name.
fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("project name is empty".to_string());
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(format!("invalid character `{c}` in project name `{name}`"));
    }
    Ok(())
}

fn starter_config(name: &str) -> String {
    format!(
        r#"[project]
name = "{name}"

[sources]
dir = "src"
suffix = ".cpp"
# include = ["*.cpp"]     # only file names matching one of these
# exclude = ["*_test.cpp"] # never these

[toolchain]
compiler = "clang"
std = "c++17"
flags = ["-O2"]

[build]
dir = "build"
# jobs = 0                # 0 picks from the CPU count
# fingerprint = "content" # or "mtime"
# archive = "always"      # or "if-changed"
"#
    )
}
