//! The build orchestrator.
//!
//! `Discover -> Filter(stale) -> Compile(parallel) -> Archive -> Done`, with
//! any unit failure, archive failure or cancellation ending in `Aborted`.
//! Fingerprints are flushed only on `Done`.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};

use kiln_cache::{FingerprintMode, StalenessTracker};
use kiln_common::CompilationUnit;
use kiln_config::{ArchivePolicy, FingerprintKind, ResolvedBuild};

use crate::archive::{ArtifactManifest, Archiver};
use crate::cancel::CancelToken;
use crate::discovery::UnitDiscovery;
use crate::error::BuildError;
use crate::exec::CommandRunner;
use crate::result::{ArchiveStatus, BuildResult, BuildState, BuildSummary, UnitFailure};
use crate::scheduler::{BuildObserver, CompileScheduler, NoopObserver, StaleUnit};

/// Runs one build of a resolved project.
pub struct BuildPipeline<'a> {
    build: &'a ResolvedBuild,
    runner: &'a dyn CommandRunner,
    observer: &'a dyn BuildObserver,
    cancel: CancelToken,
    force: bool,
}

impl<'a> BuildPipeline<'a> {
    /// Creates a pipeline that invokes external tools through `runner`.
    pub fn new(build: &'a ResolvedBuild, runner: &'a dyn CommandRunner) -> Self {
        Self {
            build,
            runner,
            observer: &NoopObserver,
            cancel: CancelToken::new(),
            force: false,
        }
    }

    /// Reports per-unit progress to `observer`.
    pub fn with_observer(mut self, observer: &'a dyn BuildObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Aborts the build once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Recompiles every unit regardless of fingerprints.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Runs the build.
    ///
    /// Unit and archive failures are reported in the returned summary with
    /// [`BuildState::Aborted`]. `Err` is returned only when the build could
    /// not be carried out at all: the source directory is unreadable, the
    /// fingerprint store cannot be read or written, or no worker pool could
    /// be created.
    pub fn run(&self) -> Result<BuildSummary, BuildError> {
        let started = Instant::now();
        let build = self.build;

        let discovery = UnitDiscovery::new(&build.source_dir, &build.object_dir)
            .with_suffix(build.source_suffix.as_str())
            .with_object_suffix(build.toolchain.object_suffix.as_str())
            .with_include(build.source_include.iter().cloned())
            .with_exclude(build.source_exclude.iter().cloned());
        let units: Vec<CompilationUnit> = discovery.discover()?.collect();
        tracing::info!(
            dir = %build.source_dir.display(),
            units = units.len(),
            "discovered sources"
        );

        let mode = match build.fingerprint {
            FingerprintKind::Content => FingerprintMode::Content,
            FingerprintKind::Mtime => FingerprintMode::Mtime,
        };
        let mut tracker = StalenessTracker::open(&build.object_dir, mode)?
            .with_force(self.force || !build.incremental);

        let live: BTreeSet<String> = units.iter().map(|u| u.id().to_string()).collect();
        let removed = tracker.prune(&live);
        for id in &removed {
            remove_orphan_object(&discovery.object_path(id));
        }

        // Filter. `slots[i]` is the result of `units[i]` once known.
        let mut slots: Vec<Option<BuildResult>> = vec![None; units.len()];
        let mut hashes: Vec<String> = vec![String::new(); units.len()];
        let mut stale = Vec::new();
        let mut stale_index = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            match tracker.check(unit) {
                Ok(check) if check.staleness.is_stale() => {
                    hashes[i] = check.hash.clone();
                    stale.push(StaleUnit {
                        unit: unit.clone(),
                        hash: check.hash,
                    });
                    stale_index.push(i);
                }
                Ok(check) => {
                    hashes[i] = check.hash;
                    slots[i] = Some(BuildResult::up_to_date(unit.id()));
                }
                Err(err) => {
                    tracing::warn!(unit = unit.id(), "cannot fingerprint source: {err}");
                    slots[i] = Some(BuildResult::failed(
                        unit.id(),
                        UnitFailure::Io {
                            message: err.to_string(),
                        },
                        Duration::ZERO,
                    ));
                }
            }
        }
        tracing::info!(
            stale = stale.len(),
            fresh = units.len() - stale.len(),
            "checked fingerprints"
        );

        let compiled = CompileScheduler::new(self.runner, &build.toolchain)
            .with_jobs(build.jobs)
            .with_timeout(build.timeout)
            .with_cancel(self.cancel.clone())
            .with_observer(self.observer)
            .run(&stale, &tracker)?;
        for (i, result) in stale_index.into_iter().zip(compiled) {
            slots[i] = Some(result);
        }
        let results: Vec<BuildResult> = slots
            .into_iter()
            .zip(&units)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| {
                    BuildResult::failed(unit.id(), UnitFailure::Cancelled, Duration::ZERO)
                })
            })
            .collect();

        let mut summary = BuildSummary {
            state: BuildState::Aborted,
            results,
            archive: ArchiveStatus::NotRun,
            output: build.output.clone(),
            archive_error: None,
            removed,
            cancelled: self.cancel.is_cancelled(),
            elapsed_ms: 0,
        };

        if summary.cancelled || summary.failed().next().is_some() {
            tracing::info!(
                failed = summary.failed().count(),
                cancelled = summary.cancelled,
                "build aborted before archiving"
            );
            return Ok(finish(summary, started));
        }

        let manifest = ArtifactManifest::new(&units, &summary.results)?;
        let stamp = manifest.stamp(&build.output, hashes.iter().map(String::as_str));
        let unchanged = build.archive == ArchivePolicy::IfChanged
            && summary.compiled_count() == 0
            && build.output.is_file()
            && tracker.archive_stamp() == Some(stamp.as_str());

        if unchanged {
            tracing::info!(output = %build.output.display(), "archive is up to date");
            summary.archive = ArchiveStatus::UpToDate;
        } else {
            let archived = Archiver::new(self.runner, &build.toolchain)
                .with_cancel(self.cancel.clone())
                .archive(manifest, &build.output);
            match archived {
                Ok(()) => {
                    tracker.record_archive_stamp(stamp);
                    summary.archive = ArchiveStatus::Archived;
                }
                Err(err) => {
                    tracing::info!("archiving failed: {err}");
                    summary.cancelled = matches!(err, BuildError::Cancelled);
                    summary.archive_error = Some(describe_archive_error(&err));
                    return Ok(finish(summary, started));
                }
            }
        }

        let committed = tracker.flush()?;
        summary.state = BuildState::Done;
        tracing::info!(
            compiled = committed,
            up_to_date = summary.up_to_date_count(),
            "build finished"
        );
        Ok(finish(summary, started))
    }
}

fn finish(mut summary: BuildSummary, started: Instant) -> BuildSummary {
    summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    summary
}

fn describe_archive_error(err: &BuildError) -> String {
    match err {
        BuildError::Archive { stderr, .. } if !stderr.trim().is_empty() => {
            format!("{err}\n{}", stderr.trim_end())
        }
        _ => err.to_string(),
    }
}

fn remove_orphan_object(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(object = %path.display(), "removed orphaned object"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(object = %path.display(), "could not remove orphaned object: {e}"),
    }
}
