//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads of persisted state are fail-safe where possible: a corrupt store
/// becomes a cache miss. These errors cover the remaining hard failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A line of the fingerprint store could not be parsed.
    #[error("malformed fingerprint store line {line}: {reason}")]
    StoreParse {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        reason: String,
    },
}
