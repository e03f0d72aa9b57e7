//! Parallel compilation of stale units.
//!
//! The scheduler runs one compiler process per unit on a bounded `rayon`
//! pool. A failing unit never stops its siblings: the pool drains and every
//! submitted unit gets exactly one [`BuildResult`], returned in submission
//! order.

use std::time::{Duration, Instant};

use kiln_cache::StalenessTracker;
use kiln_common::CompilationUnit;
use kiln_config::Toolchain;
use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::error::BuildError;
use crate::exec::{CommandRunner, RunError, RunLimits};
use crate::result::{BuildResult, UnitFailure};

/// A unit selected for compilation together with the fingerprint to commit
/// once it compiles.
#[derive(Debug, Clone)]
pub struct StaleUnit {
    /// The unit to compile.
    pub unit: CompilationUnit,
    /// The source fingerprint taken before compiling.
    pub hash: String,
}

/// Receives progress callbacks from compile workers.
///
/// Callbacks arrive on worker threads in completion order.
pub trait BuildObserver: Sync {
    /// A worker is about to invoke the compiler for `unit`.
    fn unit_started(&self, _unit: &CompilationUnit) {}

    /// A unit finished, successfully or not.
    fn unit_finished(&self, _result: &BuildResult) {}
}

/// Observer that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {}

/// Compiler arguments for `unit`:
/// `[-std=<std>] <flags...> -o <object> -c <source>`.
pub fn compile_args(toolchain: &Toolchain, unit: &CompilationUnit) -> Vec<String> {
    let mut args = Vec::with_capacity(toolchain.flags.len() + 5);
    if let Some(std) = &toolchain.std {
        args.push(format!("-std={std}"));
    }
    args.extend(toolchain.flags.iter().cloned());
    args.push("-o".to_string());
    args.push(unit.object_path().to_string_lossy().into_owned());
    args.push("-c".to_string());
    args.push(unit.source_path().to_string_lossy().into_owned());
    args
}

/// Resolves the worker count for `units` pending compiles.
///
/// `requested == 0` leaves one CPU for the rest of the system. The result is
/// never larger than the number of units and never zero.
pub fn effective_jobs(requested: usize, units: usize) -> usize {
    let jobs = if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
    } else {
        requested
    };
    jobs.min(units).max(1)
}

/// Runs compiles for a set of stale units with bounded parallelism.
pub struct CompileScheduler<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a Toolchain,
    jobs: usize,
    timeout: Option<Duration>,
    cancel: CancelToken,
    observer: &'a dyn BuildObserver,
}

impl<'a> CompileScheduler<'a> {
    /// Creates a scheduler with automatic parallelism and no timeout.
    pub fn new(runner: &'a dyn CommandRunner, toolchain: &'a Toolchain) -> Self {
        Self {
            runner,
            toolchain,
            jobs: 0,
            timeout: None,
            cancel: CancelToken::new(),
            observer: &NoopObserver,
        }
    }

    /// Caps the number of concurrent compiles; 0 picks automatically.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Kills compiles that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stops starting new compiles and kills running ones once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reports progress to `observer`.
    pub fn with_observer(mut self, observer: &'a dyn BuildObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Compiles every unit and returns one result per unit, in input order.
    ///
    /// Successful units are committed to `tracker`. Fails only if the worker
    /// pool cannot be created; unit failures are reported in the results.
    pub fn run(
        &self,
        units: &[StaleUnit],
        tracker: &StalenessTracker,
    ) -> Result<Vec<BuildResult>, BuildError> {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let jobs = effective_jobs(self.jobs, units.len());
        tracing::info!(units = units.len(), jobs, "compiling");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("kiln-compile-{i}"))
            .build()
            .map_err(|e| BuildError::Pool(e.to_string()))?;

        Ok(pool.install(|| {
            units
                .par_iter()
                .map(|stale| {
                    let result = self.compile_one(stale, tracker);
                    self.observer.unit_finished(&result);
                    result
                })
                .collect()
        }))
    }

    fn compile_one(&self, stale: &StaleUnit, tracker: &StalenessTracker) -> BuildResult {
        let unit = &stale.unit;
        if self.cancel.is_cancelled() {
            return BuildResult::failed(unit.id(), UnitFailure::Cancelled, Duration::ZERO);
        }

        self.observer.unit_started(unit);
        let started = Instant::now();
        let limits = RunLimits {
            timeout: self.timeout,
            cancel: Some(self.cancel.clone()),
        };
        // A compiler that exits 0 without writing must not leave the previous
        // object looking current.
        remove_stale_object(unit);
        let args = compile_args(self.toolchain, unit);
        let outcome = self.runner.run(&self.toolchain.compiler, &args, &limits);
        let took = started.elapsed();

        let failure = match outcome {
            Ok(output) if output.success() => {
                if unit.object_path().is_file() {
                    tracker.commit(unit, &stale.hash);
                    tracing::debug!(unit = unit.id(), ?took, "compiled");
                    return BuildResult::compiled(unit.id(), Some(output.combined()), took);
                }
                UnitFailure::Io {
                    message: format!(
                        "compiler exited successfully but wrote no object at {}",
                        unit.object_path().display()
                    ),
                }
            }
            Ok(output) => UnitFailure::Compile {
                exit_code: output.exit_code,
                output: output.combined(),
            },
            Err(RunError::TimedOut(after)) => UnitFailure::Timeout {
                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            },
            Err(RunError::Cancelled) => UnitFailure::Cancelled,
            Err(err @ (RunError::Spawn { .. } | RunError::Wait { .. })) => UnitFailure::Io {
                message: err.to_string(),
            },
        };

        remove_stale_object(unit);
        tracing::debug!(unit = unit.id(), ?failure, "compile failed");
        BuildResult::failed(unit.id(), failure, took)
    }
}

/// Deletes the unit's object, so a later archive can never pick up an
/// out-of-date object for this unit.
fn remove_stale_object(unit: &CompilationUnit) {
    match std::fs::remove_file(unit.object_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            object = %unit.object_path().display(),
            "could not remove stale object: {e}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kiln_cache::FingerprintMode;
    use parking_lot::Mutex;

    use crate::exec::CommandOutput;

    const UNITS: usize = 8;

    /// Compiler whose earlier units take longer, recording how many run at
    /// once and the order they finish in.
    #[derive(Default)]
    struct SlowCompiler {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        finished: Mutex<Vec<String>>,
    }

    impl CommandRunner for SlowCompiler {
        fn run(&self, _: &str, args: &[String], _: &RunLimits) -> Result<CommandOutput, RunError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let object = &args[args.len() - 3];
            let id = Path::new(object).file_stem().unwrap().to_string_lossy().into_owned();
            let index: u64 = id.trim_start_matches('u').parse().unwrap();
            std::thread::sleep(Duration::from_millis(10 * (UNITS as u64 - index)));
            std::fs::write(object, &id).unwrap();

            self.finished.lock().push(id);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CommandOutput::default())
        }
    }

    /// Compiler that starts but cannot be waited on.
    struct LostChild;

    impl CommandRunner for LostChild {
        fn run(&self, program: &str, _: &[String], _: &RunLimits) -> Result<CommandOutput, RunError> {
            Err(RunError::Wait {
                program: program.to_string(),
                source: std::io::Error::other("no child processes"),
            })
        }
    }

    fn stale_units(dir: &Path, count: usize) -> Vec<StaleUnit> {
        (0..count)
            .map(|i| {
                let id = format!("u{i}");
                let source = dir.join(format!("{id}.cpp"));
                std::fs::write(&source, &id).unwrap();
                StaleUnit {
                    unit: CompilationUnit::new(id.clone(), source, dir.join(format!("{id}.o"))),
                    hash: format!("hash-{id}"),
                }
            })
            .collect()
    }

    fn toolchain() -> Toolchain {
        Toolchain {
            compiler: "clang".to_string(),
            std: Some("c++17".to_string()),
            flags: vec!["-O2".to_string(), "-Wall".to_string()],
            archiver: "ar".to_string(),
            archive_flags: vec!["rc".to_string()],
            object_suffix: ".o".to_string(),
        }
    }

    #[test]
    fn compile_args_layout() {
        let unit = CompilationUnit::new(
            "string",
            PathBuf::from("soup/string.cpp"),
            PathBuf::from("int/string.o"),
        );
        assert_eq!(
            compile_args(&toolchain(), &unit),
            vec![
                "-std=c++17",
                "-O2",
                "-Wall",
                "-o",
                "int/string.o",
                "-c",
                "soup/string.cpp"
            ]
        );
    }

    #[test]
    fn compile_args_without_std() {
        let mut tc = toolchain();
        tc.std = None;
        tc.flags.clear();
        let unit = CompilationUnit::new("a", PathBuf::from("a.cpp"), PathBuf::from("a.o"));
        assert_eq!(compile_args(&tc, &unit), vec!["-o", "a.o", "-c", "a.cpp"]);
    }

    #[test]
    fn bounded_parallelism_keeps_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let units = stale_units(dir.path(), UNITS);
        let tracker = StalenessTracker::open(dir.path(), FingerprintMode::Content).unwrap();
        let compiler = SlowCompiler::default();

        let results = CompileScheduler::new(&compiler, &toolchain())
            .with_jobs(3)
            .run(&units, &tracker)
            .unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.unit_id.as_str()).collect();
        let submitted: Vec<_> = units.iter().map(|s| s.unit.id()).collect();
        assert_eq!(ids, submitted);
        assert!(results.iter().all(|r| r.is_success() && r.compiled));

        let peak = compiler.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency {peak}");
        assert_ne!(*compiler.finished.lock(), submitted);
        assert_eq!(tracker.pending_len(), UNITS);
    }

    #[test]
    fn wait_failure_is_an_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let units = stale_units(dir.path(), 1);
        let tracker = StalenessTracker::open(dir.path(), FingerprintMode::Content).unwrap();

        let results = CompileScheduler::new(&LostChild, &toolchain())
            .run(&units, &tracker)
            .unwrap();

        match &results[0].failure {
            Some(UnitFailure::Io { message }) => {
                assert!(message.contains("failed to wait for `clang`"), "{message}");
            }
            other => panic!("unexpected failure {other:?}"),
        }
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn effective_jobs_bounds() {
        assert_eq!(effective_jobs(8, 3), 3);
        assert_eq!(effective_jobs(2, 10), 2);
        assert_eq!(effective_jobs(4, 0), 1);
        let auto = effective_jobs(0, 1000);
        assert!(auto >= 1);
    }
}
