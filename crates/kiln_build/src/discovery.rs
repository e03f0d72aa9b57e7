//! Compilation unit discovery.

use std::path::{Path, PathBuf};

use kiln_common::CompilationUnit;

use crate::error::BuildError;

/// Enumerates the compilation units of a source directory.
///
/// Every regular file directly inside the source directory whose name ends
/// with the source suffix becomes one unit; its id is the name without the
/// suffix and its object lives in the object directory under the same id.
/// Include and exclude wildcard patterns narrow the set further.
#[derive(Debug, Clone)]
pub struct UnitDiscovery {
    source_dir: PathBuf,
    object_dir: PathBuf,
    suffix: String,
    object_suffix: String,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl UnitDiscovery {
    /// Creates a discovery over `source_dir` for `.cpp` sources and `.o` objects.
    pub fn new(source_dir: impl Into<PathBuf>, object_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            object_dir: object_dir.into(),
            suffix: ".cpp".to_string(),
            object_suffix: ".o".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Sets the source suffix, including the leading dot.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Sets the object suffix, including the leading dot.
    pub fn with_object_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.object_suffix = suffix.into();
        self
    }

    /// Keeps only files whose name matches one of `patterns`.
    ///
    /// An empty list keeps every file with the source suffix.
    pub fn with_include(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Drops files whose name matches any of `patterns`.
    pub fn with_exclude(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// The object path a unit called `id` compiles to.
    pub fn object_path(&self, id: &str) -> PathBuf {
        self.object_dir.join(format!("{id}{}", self.object_suffix))
    }

    /// Lists the units, sorted by id.
    ///
    /// The directory is read eagerly (sorting needs every name); units are
    /// built lazily as the iterator is consumed.
    pub fn discover(&self) -> Result<impl Iterator<Item = CompilationUnit> + '_, BuildError> {
        let io_err = |source| BuildError::Io {
            path: self.source_dir.clone(),
            source,
        };

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.source_dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if let Some(id) = self.unit_id(&path) {
                ids.push(id);
            }
        }
        ids.sort();
        tracing::debug!(dir = %self.source_dir.display(), units = ids.len(), "discovered units");

        Ok(ids.into_iter().map(move |id| {
            let source = self.source_dir.join(format!("{id}{}", self.suffix));
            let object = self.object_path(&id);
            CompilationUnit::new(id, source, object)
        }))
    }

    fn unit_id(&self, path: &Path) -> Option<String> {
        if !path.is_file() {
            return None;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping file with a non UTF-8 name");
            return None;
        };
        let stem = name
            .strip_suffix(self.suffix.as_str())
            .filter(|stem| !stem.is_empty())?;
        if !self.include.is_empty() && !self.include.iter().any(|p| wildcard_match(p, name)) {
            return None;
        }
        if self.exclude.iter().any(|p| wildcard_match(p, name)) {
            tracing::debug!(file = name, "excluded by pattern");
            return None;
        }
        // Unit ids are stored one per line, tab separated.
        if stem.chars().any(char::is_control) {
            tracing::warn!(path = %path.display(), "skipping file with a control character in its name");
            return None;
        }
        Some(stem.to_string())
    }
}

/// Matches `name` against `pattern`, where `*` matches any run of characters
/// and `?` matches exactly one.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    // Position after the last `*` and the name index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p).copied() {
            Some('*') => {
                backtrack = Some((p + 1, n));
                p += 1;
            }
            Some(c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    p = star_p;
                    n = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn discovers_sorted_units_with_suffix() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "string.cpp");
        touch(dir.path(), "Compiler.cpp");
        touch(dir.path(), "base.hpp");
        touch(dir.path(), "alpha.cpp");

        let units: Vec<_> = UnitDiscovery::new(dir.path(), "/obj")
            .discover()
            .unwrap()
            .collect();
        let ids: Vec<_> = units.iter().map(|u| u.id()).collect();
        assert_eq!(ids, vec!["Compiler", "alpha", "string"]);
        assert_eq!(units[1].source_path(), dir.path().join("alpha.cpp"));
        assert_eq!(units[1].object_path(), Path::new("/obj/alpha.o"));
    }

    #[test]
    fn custom_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "main.c");
        touch(dir.path(), "util.cpp");

        let units: Vec<_> = UnitDiscovery::new(dir.path(), "/obj")
            .with_suffix(".c")
            .with_object_suffix(".obj")
            .discover()
            .unwrap()
            .collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id(), "main");
        assert_eq!(units[0].object_path(), Path::new("/obj/main.obj"));
    }

    #[test]
    fn skips_directories_and_bare_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested.cpp")).unwrap();
        touch(dir.path(), ".cpp");
        touch(dir.path(), "real.cpp");

        let ids: Vec<_> = UnitDiscovery::new(dir.path(), "/obj")
            .discover()
            .unwrap()
            .map(|u| u.id().to_string())
            .collect();
        assert_eq!(ids, vec!["real"]);
    }

    #[test]
    fn does_not_recurse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub"), "inner.cpp");
        touch(dir.path(), "outer.cpp");

        let count = UnitDiscovery::new(dir.path(), "/obj")
            .discover()
            .unwrap()
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn unreadable_directory_is_io_error() {
        let discovery = UnitDiscovery::new("/nonexistent/kiln/src", "/obj");
        let result = discovery.discover();
        assert!(matches!(result, Err(BuildError::Io { .. })));
    }

    #[test]
    fn include_and_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["soup_a.cpp", "soup_b.cpp", "soup_b_test.cpp", "other.cpp", "soup_c.hpp"] {
            touch(dir.path(), name);
        }

        let ids: Vec<_> = UnitDiscovery::new(dir.path(), "/obj")
            .with_include(["soup_*"])
            .with_exclude(["*_test.cpp"])
            .discover()
            .unwrap()
            .map(|u| u.id().to_string())
            .collect();
        assert_eq!(ids, vec!["soup_a", "soup_b"]);
    }

    #[test]
    fn exclude_alone_keeps_the_rest_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.cpp", "scratch1.cpp", "a.cpp", "scratch22.cpp"] {
            touch(dir.path(), name);
        }

        let ids: Vec<_> = UnitDiscovery::new(dir.path(), "/obj")
            .with_exclude(["scratch?.cpp"])
            .discover()
            .unwrap()
            .map(|u| u.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "c", "scratch22"]);
    }

    #[cfg(unix)]
    #[test]
    fn skips_names_with_control_characters() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tab\tname.cpp");
        touch(dir.path(), "line\nbreak.cpp");
        touch(dir.path(), "plain.cpp");

        let ids: Vec<_> = UnitDiscovery::new(dir.path(), "/obj")
            .discover()
            .unwrap()
            .map(|u| u.id().to_string())
            .collect();
        assert_eq!(ids, vec!["plain"]);
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*.cpp", "main.cpp"));
        assert!(!wildcard_match("*.cpp", "main.cpp.bak"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(wildcard_match("*_*_test*", "x_y_z_test.cpp"));
        assert!(wildcard_match("s*p*.cpp", "soup_pot.cpp"));
        assert!(!wildcard_match("main.cpp", "Main.cpp"));
        assert!(!wildcard_match("", "a"));
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            UnitDiscovery::new(dir.path(), "/obj")
                .discover()
                .unwrap()
                .count(),
            0
        );
    }
}
