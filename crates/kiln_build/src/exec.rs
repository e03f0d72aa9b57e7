//! External command execution.
//!
//! The build never spawns processes directly; it goes through a
//! [`CommandRunner`], so tests can substitute an in-process fake for the
//! compiler and archiver.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code, `-1` if it was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output and standard error joined, in that order, skipping
    /// empty streams.
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Bounds applied to a single command.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    /// Kill the command after this long.
    pub timeout: Option<Duration>,
    /// Kill the command when this token is cancelled.
    pub cancel: Option<CancelToken>,
}

/// Why a command did not produce a [`CommandOutput`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The program could not be started.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The program started, but waiting for it to exit failed.
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        /// The program being waited on.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The command was killed after exceeding its timeout.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The command was killed because the build was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Runs external programs.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, waiting for it to exit within `limits`.
    fn run(
        &self,
        program: &str,
        args: &[String],
        limits: &RunLimits,
    ) -> Result<CommandOutput, RunError>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl ProcessRunner {
    /// Creates a runner with the default poll interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often a bounded wait checks the deadline and cancel token.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Waits for `child`, killing it when the deadline passes or the token
    /// is cancelled.
    fn wait_bounded(
        &self,
        program: &str,
        child: &mut Child,
        limits: &RunLimits,
    ) -> Result<i32, RunError> {
        let deadline = limits.timeout.map(|t| (Instant::now() + t, t));
        loop {
            let status = child.try_wait().map_err(|source| RunError::Wait {
                program: program.to_string(),
                source,
            })?;
            if let Some(status) = status {
                return Ok(status.code().unwrap_or(-1));
            }
            if limits.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                kill(child);
                return Err(RunError::Cancelled);
            }
            if let Some((at, limit)) = deadline {
                if Instant::now() >= at {
                    kill(child);
                    return Err(RunError::TimedOut(limit));
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        limits: &RunLimits,
    ) -> Result<CommandOutput, RunError> {
        tracing::trace!(program, ?args, "spawning");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let exit_code = if limits.timeout.is_none() && limits.cancel.is_none() {
            let status = child.wait().map_err(|source| RunError::Wait {
                program: program.to_string(),
                source,
            })?;
            status.code().unwrap_or(-1)
        } else {
            // Readers of a killed process are left detached: grandchildren
            // may still hold the pipes open.
            self.wait_bounded(program, &mut child, limits)?
        };

        Ok(CommandOutput {
            exit_code,
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Reads a pipe to completion on its own thread so neither pipe can fill
/// up and block the child.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
