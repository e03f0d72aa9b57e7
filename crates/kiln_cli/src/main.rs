//! Kiln CLI: the command-line interface for the kiln incremental builder.
//!
//! Provides `kiln build` to compile a project's sources into a static library,
//! recompiling only what changed, and `kiln init` to write a starter
//! `kiln.toml`.

#![warn(missing_docs)]

mod build;
mod init;
mod logging;
mod pipeline;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Kiln: incremental builds of C and C++ static libraries.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build tool")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `kiln.toml` file or the directory containing it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile stale sources and archive the library.
    Build(BuildArgs),
    /// Write a starter `kiln.toml` in the project directory.
    Init {
        /// Project name. Defaults to the directory name.
        #[arg(long)]
        name: Option<String>,
    },
}

/// Arguments for the `kiln build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Directory containing the compilation units (overrides `sources.dir`).
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Output library path (overrides `build.output`).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum number of parallel compiles (overrides `build.jobs`).
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Recompile every unit, ignoring recorded fingerprints.
    #[arg(long)]
    pub force: bool,

    /// Kill any single compile running longer than this many seconds.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// How the build result is reported.
    #[arg(long, value_enum, default_value_t = MessageFormat::Text)]
    pub message_format: MessageFormat,
}

/// Build result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    /// Human-readable status lines on stderr.
    Text,
    /// The build summary as JSON on stdout.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a config file or project directory.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    logging::init(&global);

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Init { name } => init::run(name, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(2);
        }
    }
}
