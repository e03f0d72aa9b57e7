//! Source file fingerprinting.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use kiln_common::ContentHash;

use crate::error::CacheError;

/// How a source file's fingerprint is computed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintMode {
    /// XXH3-128 of the file contents.
    #[default]
    Content,
    /// Modification time and length of the file. Cheaper, but a touched file
    /// counts as changed and a same-size edit within the mtime resolution
    /// goes unnoticed.
    Mtime,
}

/// The recorded state of a unit's source at its last successful compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// The unit this fingerprint belongs to.
    pub unit_id: String,
    /// Fingerprint string (hex content hash or `mtime:` signature).
    pub hash: String,
    /// When this fingerprint was recorded.
    pub timestamp: SystemTime,
}

impl Fingerprint {
    /// Creates a fingerprint recorded now.
    pub fn now(unit_id: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            hash: hash.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Utility for computing source fingerprints.
pub struct SourceHasher;

impl SourceHasher {
    /// Computes the fingerprint string of a file under `mode`.
    pub fn fingerprint(path: &Path, mode: FingerprintMode) -> Result<String, CacheError> {
        match mode {
            FingerprintMode::Content => Self::hash_file(path).map(|h| h.to_string()),
            FingerprintMode::Mtime => Self::mtime_signature(path),
        }
    }

    /// Computes the content hash of a single file.
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(ContentHash::from_bytes(&content))
    }

    fn mtime_signature(path: &Path) -> Result<String, CacheError> {
        let io_err = |e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let meta = std::fs::metadata(path).map_err(io_err)?;
        let modified = meta.modified().map_err(io_err)?;
        // Pre-epoch mtimes collapse to zero; they still change when the file does.
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
        Ok(format!(
            "mtime:{}.{:09}:{}",
            since_epoch.as_secs(),
            since_epoch.subsec_nanos(),
            meta.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_fingerprint_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cpp");
        std::fs::write(&path, "int a() { return 1; }").unwrap();

        let h1 = SourceHasher::fingerprint(&path, FingerprintMode::Content).unwrap();
        let h2 = SourceHasher::fingerprint(&path, FingerprintMode::Content).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn content_fingerprint_tracks_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cpp");
        std::fs::write(&path, "int a() { return 1; }").unwrap();
        let before = SourceHasher::fingerprint(&path, FingerprintMode::Content).unwrap();
        std::fs::write(&path, "int a() { return 2; }").unwrap();
        let after = SourceHasher::fingerprint(&path, FingerprintMode::Content).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn mtime_fingerprint_includes_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cpp");
        std::fs::write(&path, "12345").unwrap();
        let sig = SourceHasher::fingerprint(&path, FingerprintMode::Mtime).unwrap();
        assert!(sig.starts_with("mtime:"));
        assert!(sig.ends_with(":5"));
    }

    #[test]
    fn missing_file_errors() {
        let result =
            SourceHasher::fingerprint(Path::new("/nonexistent/a.cpp"), FingerprintMode::Content);
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }
}
