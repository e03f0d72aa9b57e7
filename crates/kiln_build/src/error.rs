//! Error types for build operations.

use std::path::PathBuf;
use std::time::Duration;

use kiln_cache::CacheError;

/// Errors produced while building.
///
/// Per-unit failures (`Compile`, `Timeout`, unit-level `Io`) are captured in
/// that unit's [`BuildResult`](crate::BuildResult) and surface through the
/// build summary. The remaining variants abort the build as a whole.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The compiler exited with a non-zero status.
    #[error("failed to compile `{unit}` (exit code {exit_code})")]
    Compile {
        /// The unit that failed.
        unit: String,
        /// Compiler exit code, `-1` if it was killed by a signal.
        exit_code: i32,
        /// Captured compiler output.
        stderr: String,
    },

    /// A compile exceeded the configured per-unit timeout.
    #[error("compiling `{unit}` timed out after {}s", after.as_secs_f64())]
    Timeout {
        /// The unit that timed out.
        unit: String,
        /// The configured limit.
        after: Duration,
    },

    /// The archiver exited with a non-zero status.
    #[error("archiver failed (exit code {exit_code})")]
    Archive {
        /// Archiver exit code, `-1` if it was killed by a signal.
        exit_code: i32,
        /// Captured archiver output.
        stderr: String,
    },

    /// Archiving was attempted while some units had failed.
    #[error("cannot archive with failed units: {}", failed.join(", "))]
    Precondition {
        /// Ids of the failed units.
        failed: Vec<String>,
    },

    /// The build was cancelled.
    #[error("build cancelled")]
    Cancelled,

    /// The compile worker pool could not be created.
    #[error("failed to start compile workers: {0}")]
    Pool(String),

    /// Fingerprint state could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
