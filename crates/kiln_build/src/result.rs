//! Per-unit build results and the end-of-build summary.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::BuildError;

/// Whether a unit ended the build with a usable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// The unit's object is current.
    Success,
    /// The unit could not be compiled.
    Failed,
}

/// Why a unit failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitFailure {
    /// The compiler exited non-zero.
    Compile {
        /// Compiler exit code.
        exit_code: i32,
        /// Captured compiler output.
        output: String,
    },
    /// The compile was killed after the per-unit timeout.
    Timeout {
        /// The limit in milliseconds.
        after_ms: u64,
    },
    /// The source could not be read, the compiler could not be started, or
    /// the compiler produced no object.
    Io {
        /// Description of the failure.
        message: String,
    },
    /// The build was cancelled before or during this unit's compile.
    Cancelled,
}

impl UnitFailure {
    /// Converts the failure into the corresponding [`BuildError`] for `unit`.
    pub fn to_error(&self, unit: &str) -> BuildError {
        match self {
            UnitFailure::Compile { exit_code, output } => BuildError::Compile {
                unit: unit.to_string(),
                exit_code: *exit_code,
                stderr: output.clone(),
            },
            UnitFailure::Timeout { after_ms } => BuildError::Timeout {
                unit: unit.to_string(),
                after: Duration::from_millis(*after_ms),
            },
            UnitFailure::Io { message } => BuildError::Io {
                path: PathBuf::from(unit),
                source: std::io::Error::other(message.clone()),
            },
            UnitFailure::Cancelled => BuildError::Cancelled,
        }
    }
}

/// The outcome of one unit in one build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    /// The unit's id.
    pub unit_id: String,
    /// Final status.
    pub status: BuildStatus,
    /// `true` if the compiler ran for this unit in this invocation.
    pub compiled: bool,
    /// Compiler diagnostics printed by a successful compile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    /// Failure details when `status` is [`BuildStatus::Failed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<UnitFailure>,
    /// Wall-clock compile time in milliseconds.
    pub duration_ms: u64,
}

impl BuildResult {
    /// A unit whose recorded object is current.
    pub fn up_to_date(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: BuildStatus::Success,
            compiled: false,
            warnings: None,
            failure: None,
            duration_ms: 0,
        }
    }

    /// A unit that compiled successfully.
    pub fn compiled(unit_id: impl Into<String>, warnings: Option<String>, took: Duration) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: BuildStatus::Success,
            compiled: true,
            warnings: warnings.filter(|w| !w.trim().is_empty()),
            failure: None,
            duration_ms: millis(took),
        }
    }

    /// A unit that failed.
    pub fn failed(unit_id: impl Into<String>, failure: UnitFailure, took: Duration) -> Self {
        let compiled = !matches!(failure, UnitFailure::Cancelled);
        Self {
            unit_id: unit_id.into(),
            status: BuildStatus::Failed,
            compiled,
            warnings: None,
            failure: Some(failure),
            duration_ms: millis(took),
        }
    }

    /// Returns `true` for [`BuildStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }

    /// Captured output explaining a failure, if any.
    pub fn error_output(&self) -> Option<&str> {
        match self.failure.as_ref()? {
            UnitFailure::Compile { output, .. } => Some(output),
            UnitFailure::Io { message } => Some(message),
            UnitFailure::Timeout { .. } | UnitFailure::Cancelled => None,
        }
    }

    /// The failure as a [`BuildError`], if the unit failed.
    pub fn error(&self) -> Option<BuildError> {
        self.failure.as_ref().map(|f| f.to_error(&self.unit_id))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Terminal state of a build invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    /// Every unit succeeded and the archive is current.
    Done,
    /// A unit failed, archiving failed, or the build was cancelled.
    Aborted,
}

/// What happened to the output archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveStatus {
    /// The archiver ran and the output was replaced.
    Archived,
    /// The output already matched the manifest.
    UpToDate,
    /// The archive step did not run.
    NotRun,
}

/// Aggregate outcome of one build invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    /// Terminal state.
    pub state: BuildState,
    /// One result per discovered unit, in discovery order.
    pub results: Vec<BuildResult>,
    /// Archive step outcome.
    pub archive: ArchiveStatus,
    /// Output archive path.
    pub output: PathBuf,
    /// Why archiving failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_error: Option<String>,
    /// Ids of units whose sources disappeared since the last build.
    pub removed: Vec<String>,
    /// `true` if the build was cancelled.
    pub cancelled: bool,
    /// Total wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

impl BuildSummary {
    /// Returns `true` if the build reached [`BuildState::Done`].
    pub fn is_success(&self) -> bool {
        self.state == BuildState::Done
    }

    /// Results of units that failed.
    pub fn failed(&self) -> impl Iterator<Item = &BuildResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Number of units the compiler ran for.
    pub fn compiled_count(&self) -> usize {
        self.results.iter().filter(|r| r.compiled).count()
    }

    /// Number of units skipped as up to date.
    pub fn up_to_date_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_success() && !r.compiled)
            .count()
    }

    /// Human-readable report of every failure, empty on success.
    ///
    /// Each failed unit is listed with its captured output, followed by the
    /// archive failure if there was one.
    pub fn failure_report(&self) -> String {
        let mut out = String::new();
        for result in self.failed() {
            if let Some(err) = result.error() {
                let _ = writeln!(out, "error: {err}");
            }
            if let Some(text) = result.error_output() {
                for line in text.lines() {
                    let _ = writeln!(out, "  {line}");
                }
            }
        }
        if let Some(err) = &self.archive_error {
            let _ = writeln!(out, "error: {err}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(results: Vec<BuildResult>) -> BuildSummary {
        let state = if results.iter().all(BuildResult::is_success) {
            BuildState::Done
        } else {
            BuildState::Aborted
        };
        BuildSummary {
            state,
            results,
            archive: ArchiveStatus::NotRun,
            output: PathBuf::from("libsoup.a"),
            archive_error: None,
            removed: Vec::new(),
            cancelled: false,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn counts() {
        let s = summary(vec![
            BuildResult::up_to_date("a"),
            BuildResult::compiled("b", None, Duration::from_millis(5)),
            BuildResult::compiled("c", Some("warning: x".into()), Duration::ZERO),
        ]);
        assert!(s.is_success());
        assert_eq!(s.compiled_count(), 2);
        assert_eq!(s.up_to_date_count(), 1);
        assert_eq!(s.failed().count(), 0);
        assert!(s.failure_report().is_empty());
    }

    #[test]
    fn blank_warnings_are_dropped() {
        let r = BuildResult::compiled("a", Some("  \n".into()), Duration::ZERO);
        assert!(r.warnings.is_none());
    }

    #[test]
    fn failure_report_names_unit_and_output() {
        let s = summary(vec![
            BuildResult::failed(
                "a",
                UnitFailure::Compile {
                    exit_code: 1,
                    output: "a.cpp:1:1: error: expected ';'".into(),
                },
                Duration::ZERO,
            ),
            BuildResult::compiled("b", None, Duration::ZERO),
        ]);
        assert!(!s.is_success());
        let report = s.failure_report();
        assert!(report.contains("failed to compile `a`"));
        assert!(report.contains("  a.cpp:1:1: error: expected ';'"));
        assert!(!report.contains("`b`"));
    }

    #[test]
    fn cancelled_unit_is_not_counted_as_compiled() {
        let r = BuildResult::failed("a", UnitFailure::Cancelled, Duration::ZERO);
        assert!(!r.compiled);
        assert!(r.error_output().is_none());
        assert!(matches!(r.error(), Some(BuildError::Cancelled)));
    }

    #[test]
    fn timeout_maps_to_timeout_error() {
        let r = BuildResult::failed("slow", UnitFailure::Timeout { after_ms: 2000 }, Duration::ZERO);
        match r.error() {
            Some(BuildError::Timeout { unit, after }) => {
                assert_eq!(unit, "slow");
                assert_eq!(after, Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn serializes_to_json() {
        let s = summary(vec![BuildResult::failed(
            "a",
            UnitFailure::Timeout { after_ms: 10 },
            Duration::ZERO,
        )]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["state"], "aborted");
        assert_eq!(json["archive"], "not-run");
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][0]["failure"]["kind"], "timeout");
    }
}
