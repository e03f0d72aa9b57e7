//! `kiln build`: incremental compile and archive.
//!
//! Loads the project configuration, applies command-line overrides and runs
//! the build pipeline with cargo-style status lines on stderr.

use std::path::Path;
use std::time::Duration;

use kiln_build::{
    ArchiveStatus, BuildObserver, BuildPipeline, BuildResult, BuildSummary, CancelToken,
    ProcessRunner,
};
use kiln_common::CompilationUnit;
use kiln_config::{resolve_build, ResolvedBuild};

use crate::pipeline::{ensure_directory, load_project_config, resolve_project_root};
use crate::{BuildArgs, GlobalArgs, MessageFormat};

/// Runs the `kiln build` command.
///
/// Returns exit code 0 when the build reached `Done` and 1 when it was
/// aborted by a failed unit, a failed archive or cancellation. Setup failures
/// are returned as errors.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let build = prepare(args, global, &cwd)?;
    ensure_directory(&build.object_dir)?;

    let status = StatusPrinter {
        quiet: global.quiet,
    };
    status.line("Building", &build.name);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!("could not install Ctrl-C handler: {e}");
    }

    let runner = ProcessRunner::new();
    let summary = BuildPipeline::new(&build, &runner)
        .with_observer(&status)
        .with_cancel(cancel)
        .with_force(args.force)
        .run()?;

    match args.message_format {
        MessageFormat::Text => report(&summary, &status),
        MessageFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(if summary.is_success() { 0 } else { 1 })
}

/// Resolves the build description for this invocation.
///
/// Command-line paths are relative to `cwd`; configured paths are relative
/// to the project root.
pub fn prepare(
    args: &BuildArgs,
    global: &GlobalArgs,
    cwd: &Path,
) -> Result<ResolvedBuild, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global, cwd)?;
    let config = load_project_config(global, cwd, &project_dir)?;
    let mut build = resolve_build(&config, &project_dir);
    apply_overrides(&mut build, args, cwd);
    tracing::debug!(
        project = %project_dir.display(),
        objects = %build.object_dir.display(),
        "resolved build"
    );
    Ok(build)
}

fn apply_overrides(build: &mut ResolvedBuild, args: &BuildArgs, cwd: &Path) {
    if let Some(dir) = &args.source_dir {
        build.source_dir = cwd.join(dir);
    }
    if let Some(output) = &args.output {
        build.output = cwd.join(output);
    }
    if let Some(jobs) = args.jobs {
        build.jobs = jobs;
    }
    if let Some(secs) = args.timeout {
        build.timeout = Some(Duration::from_secs(secs));
    }
}

/// Prints a status line per unit as workers pick them up.
struct StatusPrinter {
    quiet: bool,
}

impl StatusPrinter {
    fn line(&self, verb: &str, message: &str) {
        if !self.quiet {
            eprintln!("{verb:>12} {message}");
        }
    }
}

impl BuildObserver for StatusPrinter {
    fn unit_started(&self, unit: &CompilationUnit) {
        self.line("Compiling", unit.id());
    }

    fn unit_finished(&self, result: &BuildResult) {
        if let Some(warnings) = &result.warnings {
            if !self.quiet {
                eprintln!("warning: `{}` compiled with diagnostics", result.unit_id);
                for line in warnings.lines() {
                    eprintln!("  {line}");
                }
            }
        }
    }
}

fn report(summary: &BuildSummary, status: &StatusPrinter) {
    for id in &summary.removed {
        status.line("Removed", id);
    }

    if !summary.is_success() {
        eprint!("{}", summary.failure_report());
        let failed = summary.failed().count();
        if summary.cancelled {
            eprintln!("error: build cancelled");
        } else if failed > 0 {
            let noun = if failed == 1 { "unit" } else { "units" };
            eprintln!("error: build aborted, {failed} {noun} failed");
        } else {
            eprintln!("error: build aborted, could not archive {}", summary.output.display());
        }
        return;
    }

    let output = summary.output.display().to_string();
    match summary.archive {
        ArchiveStatus::Archived => status.line("Archived", &output),
        ArchiveStatus::UpToDate => status.line("Fresh", &output),
        ArchiveStatus::NotRun => {}
    }
    status.line(
        "Finished",
        &format!(
            "{} compiled, {} up to date in {:.2}s",
            summary.compiled_count(),
            summary.up_to_date_count(),
            Duration::from_millis(summary.elapsed_ms).as_secs_f64()
        ),
    );
}
