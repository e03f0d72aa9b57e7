//! Diagnostic logging setup.
//!
//! Library crates emit `tracing` events; the CLI decides what reaches stderr.
//! `KILN_LOG` takes an `EnvFilter` directive (e.g. `kiln_cache=debug`) and
//! overrides the level picked from `--quiet`/`--verbose`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::GlobalArgs;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "KILN_LOG";

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(global: &GlobalArgs) {
    let env = std::env::var(LOG_ENV).ok();
    let directive = filter_directive(global, env.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("warning: ignoring invalid {LOG_ENV} `{directive}`: {e}");
        EnvFilter::new(default_level(global))
    });
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(global.verbose),
        )
        .with(filter)
        .try_init();
}

fn filter_directive(global: &GlobalArgs, env: Option<&str>) -> String {
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directive) => directive.to_string(),
        None => default_level(global).to_string(),
    }
}

fn default_level(global: &GlobalArgs) -> &'static str {
    if global.verbose {
        "debug"
    } else if global.quiet {
        "error"
    } else {
        "warn"
    }
}
