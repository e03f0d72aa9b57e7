//! Resolution of a parsed configuration against a project directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_common::{ContentHash, ContentHasher};

use crate::types::{ArchivePolicy, FingerprintKind, KilnConfig};

/// Subdirectory of the build directory holding per-toolchain object sets.
const INTERMEDIATE_SUBDIR: &str = "int";

/// The external programs and arguments used to build objects and the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Compiler program.
    pub compiler: String,
    /// Language standard, passed as `-std=<std>`.
    pub std: Option<String>,
    /// Extra compiler arguments.
    pub flags: Vec<String>,
    /// Archiver program.
    pub archiver: String,
    /// Archiver arguments placed before the output path.
    pub archive_flags: Vec<String>,
    /// Object file suffix.
    pub object_suffix: String,
}

impl Toolchain {
    /// Hash of everything that affects the content of an object file.
    ///
    /// Objects built by different toolchains live in different directories,
    /// so switching flags back and forth never reuses a mismatched object.
    pub fn identity(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher
            .field(std::env::consts::OS)
            .field(&self.compiler)
            .field(self.std.as_deref().unwrap_or(""))
            .field(&self.object_suffix);
        for flag in &self.flags {
            hasher.field(flag);
        }
        hasher.finish()
    }
}

/// A fully resolved build description with absolute paths.
#[derive(Debug, Clone)]
pub struct ResolvedBuild {
    /// Project name.
    pub name: String,
    /// Directory scanned for compilation units.
    pub source_dir: PathBuf,
    /// Suffix selecting compilation units.
    pub source_suffix: String,
    /// File name patterns a unit must match, if any are given.
    pub source_include: Vec<String>,
    /// File name patterns excluding units.
    pub source_exclude: Vec<String>,
    /// Directory receiving object files and the fingerprint store.
    pub object_dir: PathBuf,
    /// Final archive path.
    pub output: PathBuf,
    /// External toolchain.
    pub toolchain: Toolchain,
    /// Maximum parallel compiles; 0 means automatic.
    pub jobs: usize,
    /// Per-unit compile timeout.
    pub timeout: Option<Duration>,
    /// Fingerprint strategy.
    pub fingerprint: FingerprintKind,
    /// Whether up-to-date units may be skipped.
    pub incremental: bool,
    /// Archive step policy.
    pub archive: ArchivePolicy,
}

/// Resolves `config` relative to `project_dir`.
///
/// The project name falls back to the directory name (or its parent's name
/// when the directory is called `src`). The object directory is
/// `<build.dir>/int/<toolchain identity>`. The default output is
/// `lib<name>.a` (`<name>.lib` on Windows) in the project directory.
pub fn resolve_build(config: &KilnConfig, project_dir: &Path) -> ResolvedBuild {
    let name = if config.project.name.is_empty() {
        derive_project_name(project_dir)
    } else {
        config.project.name.clone()
    };

    let toolchain = Toolchain {
        compiler: config.toolchain.compiler.clone(),
        std: config.toolchain.std.clone(),
        flags: config.toolchain.flags.clone(),
        archiver: config.toolchain.archiver.clone(),
        archive_flags: config.toolchain.archive_flags.clone(),
        object_suffix: config.toolchain.object_suffix.clone(),
    };

    let object_dir = project_dir
        .join(&config.build.dir)
        .join(INTERMEDIATE_SUBDIR)
        .join(toolchain.identity().short());

    let output = match &config.build.output {
        Some(out) => project_dir.join(out),
        None => project_dir.join(default_output_name(&name)),
    };

    ResolvedBuild {
        name,
        source_dir: project_dir.join(&config.sources.dir),
        source_suffix: config.sources.suffix.clone(),
        source_include: config.sources.include.clone(),
        source_exclude: config.sources.exclude.clone(),
        object_dir,
        output,
        toolchain,
        jobs: config.build.jobs,
        timeout: config.build.timeout_secs.map(Duration::from_secs),
        fingerprint: config.build.fingerprint,
        incremental: config.build.incremental,
        archive: config.build.archive,
    }
}

/// Platform file name of a static library called `name`.
pub fn default_output_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.lib")
    } else {
        format!("lib{name}.a")
    }
}

fn derive_project_name(project_dir: &Path) -> String {
    let mut dir = project_dir;
    if dir.file_name().is_some_and(|n| n == "src") {
        if let Some(parent) = dir.parent() {
            dir = parent;
        }
    }
    dir.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("out")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn resolve_defaults() {
        let config = load_config_from_str("").unwrap();
        let resolved = resolve_build(&config, Path::new("/work/soup"));
        assert_eq!(resolved.name, "soup");
        assert_eq!(resolved.source_dir, PathBuf::from("/work/soup/src"));
        assert_eq!(resolved.source_suffix, ".cpp");
        assert!(resolved.object_dir.starts_with("/work/soup/build/int"));
        assert_eq!(
            resolved.output,
            PathBuf::from("/work/soup").join(default_output_name("soup"))
        );
        assert!(resolved.timeout.is_none());
        assert!(resolved.incremental);
    }

    #[test]
    fn explicit_name_and_output() {
        let config = load_config_from_str(
            r#"
[project]
name = "engine"

[build]
dir = "bin"
output = "out/libengine.a"
timeout_secs = 30
"#,
        )
        .unwrap();
        let resolved = resolve_build(&config, Path::new("/p"));
        assert_eq!(resolved.name, "engine");
        assert_eq!(resolved.output, PathBuf::from("/p/out/libengine.a"));
        assert!(resolved.object_dir.starts_with("/p/bin/int"));
        assert_eq!(resolved.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn source_patterns_are_carried() {
        let config =
            load_config_from_str("[sources]\ninclude = \"soup*\"\nexclude = \"*_test.cpp\"\n")
                .unwrap();
        let resolved = resolve_build(&config, Path::new("/p"));
        assert_eq!(resolved.source_include, vec!["soup*"]);
        assert_eq!(resolved.source_exclude, vec!["*_test.cpp"]);
    }

    #[test]
    fn name_skips_src_directory() {
        let config = load_config_from_str("").unwrap();
        let resolved = resolve_build(&config, Path::new("/work/soup/src"));
        assert_eq!(resolved.name, "soup");
    }

    #[test]
    fn toolchain_identity_tracks_flags() {
        let a = load_config_from_str("[toolchain]\nflags = [\"-O2\"]\n").unwrap();
        let b = load_config_from_str("[toolchain]\nflags = [\"-O0\"]\n").unwrap();
        let ra = resolve_build(&a, Path::new("/p"));
        let rb = resolve_build(&b, Path::new("/p"));
        assert_ne!(ra.object_dir, rb.object_dir);
    }

    #[test]
    fn toolchain_identity_ignores_archiver() {
        let a = load_config_from_str("[toolchain]\narchiver = \"ar\"\n").unwrap();
        let b = load_config_from_str("[toolchain]\narchiver = \"llvm-ar\"\n").unwrap();
        let ra = resolve_build(&a, Path::new("/p"));
        let rb = resolve_build(&b, Path::new("/p"));
        assert_eq!(ra.object_dir, rb.object_dir);
    }
}
