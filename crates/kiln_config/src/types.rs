//! Configuration types deserialized from `kiln.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

/// The top-level project configuration parsed from `kiln.toml`.
///
/// Every section is optional. An empty file (or no file at all) describes a
/// project whose `.cpp` sources live in `src/` and are compiled with `clang`
/// into a static library named after the project directory.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectMeta,
    /// Where to find compilation units.
    #[serde(default)]
    pub sources: SourcesConfig,
    /// External compiler and archiver invocation.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// Build directory, parallelism and caching behavior.
    #[serde(default)]
    pub build: BuildConfig,
}

/// Project metadata.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMeta {
    /// The project name. Derived from the project directory when empty.
    #[serde(default)]
    pub name: String,
}

/// Source discovery settings.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    /// Directory scanned for compilation units, relative to the project root.
    pub dir: String,
    /// File suffix selecting compilation units, including the leading dot.
    pub suffix: String,
    /// Wildcard patterns (`*`, `?`) over file names. When non-empty, only
    /// matching files become units.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub include: Vec<String>,
    /// Wildcard patterns over file names removed from the unit set.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub exclude: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dir: "src".to_string(),
            suffix: ".cpp".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// External toolchain settings.
///
/// Each unit is compiled as
/// `<compiler> [-std=<std>] <flags...> -o <object> -c <source>` and the
/// library is produced with `<archiver> <archive_flags...> <output> <objects...>`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Compiler program name or path.
    pub compiler: String,
    /// Language standard passed as `-std=<std>`.
    pub std: Option<String>,
    /// Extra compiler arguments. Accepts a single string or a list.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub flags: Vec<String>,
    /// Archiver program name or path.
    pub archiver: String,
    /// Archiver arguments placed before the output path.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub archive_flags: Vec<String>,
    /// Suffix of produced object files, including the leading dot.
    pub object_suffix: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "clang".to_string(),
            std: None,
            flags: Vec::new(),
            archiver: default_archiver().to_string(),
            archive_flags: vec!["rc".to_string()],
            object_suffix: ".o".to_string(),
        }
    }
}

/// The platform archiver: `llvm-ar` on Windows, `ar` elsewhere.
pub fn default_archiver() -> &'static str {
    if cfg!(windows) {
        "llvm-ar"
    } else {
        "ar"
    }
}

/// Build execution settings.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Build directory for intermediate objects, relative to the project root.
    pub dir: String,
    /// Output archive path, relative to the project root.
    pub output: Option<String>,
    /// Maximum number of parallel compiles; 0 picks one from the CPU count.
    pub jobs: usize,
    /// Per-unit compile timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// How source files are fingerprinted.
    pub fingerprint: FingerprintKind,
    /// When false every unit is compiled on every build.
    pub incremental: bool,
    /// When the archiver runs.
    pub archive: ArchivePolicy,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dir: "build".to_string(),
            output: None,
            jobs: 0,
            timeout_secs: None,
            fingerprint: FingerprintKind::default(),
            incremental: true,
            archive: ArchivePolicy::default(),
        }
    }
}

/// How a source file's fingerprint is computed.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintKind {
    /// Hash of the file contents (default).
    #[default]
    Content,
    /// Modification time and length of the file.
    Mtime,
}

/// When the archive step runs on a successful build.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArchivePolicy {
    /// Archive on every successful build (default).
    #[default]
    Always,
    /// Skip archiving when nothing was recompiled and the output is current.
    IfChanged,
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Allows `flags = "-O2"` as shorthand for `flags = ["-O2"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}
