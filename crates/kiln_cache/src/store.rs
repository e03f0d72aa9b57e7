//! On-disk fingerprint store.
//!
//! The store is a line-oriented file, `fingerprints.tsv`, inside the object
//! directory. Each line is `<unit id>\t<fingerprint>`, sorted by unit id so
//! that successive builds produce minimal diffs. Writes go to a temporary
//! sibling and are renamed into place, so readers never see a torn file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::CacheError;
use crate::hasher::Fingerprint;

/// Name of the fingerprint store within the object directory.
const STORE_FILE: &str = "fingerprints.tsv";

/// Persisted fingerprints of the last successful build, keyed by unit id.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
    entries: BTreeMap<String, Fingerprint>,
}

impl FingerprintStore {
    /// Creates an empty store that will persist into `dir`.
    pub fn empty(dir: &Path) -> Self {
        Self {
            path: dir.join(STORE_FILE),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the store from `dir`.
    ///
    /// A missing file yields an empty store. A malformed file is discarded
    /// with a warning so that the next build starts from scratch. Other I/O
    /// errors are returned.
    pub fn load(dir: &Path) -> Result<Self, CacheError> {
        let mut store = Self::empty(dir);
        let content = match std::fs::read_to_string(&store.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => {
                return Err(CacheError::Io {
                    path: store.path,
                    source: e,
                })
            }
        };

        let recorded = std::fs::metadata(&store.path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        match Self::parse(&content, recorded) {
            Ok(entries) => store.entries = entries,
            Err(e) => {
                tracing::warn!(path = %store.path.display(), "ignoring fingerprint store: {e}");
            }
        }
        Ok(store)
    }

    /// Parses store content. Every entry gets `recorded` as its timestamp.
    pub fn parse(
        content: &str,
        recorded: SystemTime,
    ) -> Result<BTreeMap<String, Fingerprint>, CacheError> {
        let mut entries = BTreeMap::new();
        for (idx, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let (id, hash) = line.split_once('\t').ok_or_else(|| CacheError::StoreParse {
                line: idx + 1,
                reason: "missing tab separator".to_string(),
            })?;
            if id.is_empty() || hash.is_empty() || hash.contains('\t') {
                return Err(CacheError::StoreParse {
                    line: idx + 1,
                    reason: "expected exactly two non-empty fields".to_string(),
                });
            }
            let previous = entries.insert(
                id.to_string(),
                Fingerprint {
                    unit_id: id.to_string(),
                    hash: hash.to_string(),
                    timestamp: recorded,
                },
            );
            if previous.is_some() {
                return Err(CacheError::StoreParse {
                    line: idx + 1,
                    reason: format!("duplicate unit '{id}'"),
                });
            }
        }
        Ok(entries)
    }

    /// Renders the store in its on-disk format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for fp in self.entries.values() {
            out.push_str(&fp.unit_id);
            out.push('\t');
            out.push_str(&fp.hash);
            out.push('\n');
        }
        out
    }

    /// Writes the store atomically, creating its directory if needed.
    pub fn save(&self) -> Result<(), CacheError> {
        write_atomic(&self.path, self.render().as_bytes())
    }

    /// Returns the fingerprint recorded for `unit_id`.
    pub fn get(&self, unit_id: &str) -> Option<&Fingerprint> {
        self.entries.get(unit_id)
    }

    /// Records a fingerprint, replacing any previous one for the same unit.
    pub fn insert(&mut self, fingerprint: Fingerprint) {
        self.entries.insert(fingerprint.unit_id.clone(), fingerprint);
    }

    /// Removes and returns fingerprints whose unit id fails `keep`.
    pub fn remove_unless(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !keep(id.as_str()))
            .cloned()
            .collect();
        for id in &removed {
            self.entries.remove(id);
        }
        removed
    }

    /// Number of recorded fingerprints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no fingerprints are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes `data` to `path` through a temporary sibling and a rename.
///
/// Creates the parent directory if it doesn't exist. On failure the
/// temporary file is removed and `path` is untouched.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let io_err = |p: &Path, e| CacheError::Io {
        path: p.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let written = std::fs::File::create(&tmp).and_then(|mut f| {
        f.write_all(data)?;
        f.sync_all()
    });
    if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
