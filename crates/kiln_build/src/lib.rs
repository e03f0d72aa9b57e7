//! Incremental build orchestration.
//!
//! Discovers compilation units in a source directory, compiles the stale ones
//! in parallel through an external compiler and archives every object into a
//! static library once all units succeeded. External programs are invoked
//! through the [`CommandRunner`] trait.

#![warn(missing_docs)]

pub mod archive;
pub mod cancel;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod pipeline;
pub mod result;
pub mod scheduler;

pub use archive::{ArtifactManifest, Archiver};
pub use cancel::CancelToken;
pub use discovery::UnitDiscovery;
pub use error::BuildError;
pub use exec::{CommandOutput, CommandRunner, ProcessRunner, RunError, RunLimits};
pub use pipeline::BuildPipeline;
pub use result::{
    ArchiveStatus, BuildResult, BuildState, BuildStatus, BuildSummary, UnitFailure,
};
pub use scheduler::{
    compile_args, effective_jobs, BuildObserver, CompileScheduler, NoopObserver, StaleUnit,
};
