//! Archiving compiled objects into the output library.

use std::path::{Path, PathBuf};

use kiln_common::{CompilationUnit, ContentHasher};
use kiln_config::Toolchain;

use crate::cancel::CancelToken;
use crate::error::BuildError;
use crate::exec::{CommandRunner, RunError, RunLimits};
use crate::result::BuildResult;

/// The ordered object paths of a build in which every unit succeeded.
///
/// The only way to obtain a manifest is [`ArtifactManifest::new`], which
/// refuses results containing a failure, so the archiver can never be handed
/// a failed unit's stale object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactManifest {
    objects: Vec<PathBuf>,
}

impl ArtifactManifest {
    /// Builds the manifest for `units` from their results.
    ///
    /// `results` must hold one result per unit, in the same order. Fails with
    /// [`BuildError::Precondition`] if any result is not a success.
    pub fn new(units: &[CompilationUnit], results: &[BuildResult]) -> Result<Self, BuildError> {
        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.unit_id.clone())
            .collect();
        if !failed.is_empty() {
            return Err(BuildError::Precondition { failed });
        }
        let missing: Vec<String> = units
            .iter()
            .filter(|u| !results.iter().any(|r| r.unit_id == u.id()))
            .map(|u| u.id().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::Precondition { failed: missing });
        }
        Ok(Self {
            objects: units.iter().map(|u| u.object_path().to_path_buf()).collect(),
        })
    }

    /// Object paths in archive order.
    pub fn objects(&self) -> &[PathBuf] {
        &self.objects
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the manifest lists no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Identity of an archive built from this manifest into `output`.
    ///
    /// `fingerprints` are the source fingerprints of the units, in manifest
    /// order, so a rebuilt object changes the stamp even when paths don't.
    pub fn stamp<'f>(&self, output: &Path, fingerprints: impl IntoIterator<Item = &'f str>) -> String {
        let mut hasher = ContentHasher::new();
        hasher.field(output.to_string_lossy().as_bytes());
        for object in &self.objects {
            hasher.field(object.to_string_lossy().as_bytes());
        }
        for fp in fingerprints {
            hasher.field(fp);
        }
        hasher.finish().to_string()
    }
}

/// Runs the archiver over a manifest.
pub struct Archiver<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a Toolchain,
    cancel: Option<CancelToken>,
}

impl<'a> Archiver<'a> {
    /// Creates an archiver using `toolchain.archiver`.
    pub fn new(runner: &'a dyn CommandRunner, toolchain: &'a Toolchain) -> Self {
        Self {
            runner,
            toolchain,
            cancel: None,
        }
    }

    /// Kills the archiver when `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Archiver arguments writing `objects` into `output`, in order.
    pub fn archive_args(&self, output: &Path, objects: &[PathBuf]) -> Vec<String> {
        let mut args = self.toolchain.archive_flags.clone();
        args.push(output.to_string_lossy().into_owned());
        args.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));
        args
    }

    /// Archives `manifest` into `output`.
    ///
    /// The archiver writes a temporary sibling of `output` that is renamed
    /// over `output` only after the archiver succeeded. On any failure the
    /// previous `output` is left untouched.
    pub fn archive(&self, manifest: ArtifactManifest, output: &Path) -> Result<(), BuildError> {
        let io_err = |path: &Path, source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let tmp = temp_path(output);
        // `ar rc` appends to an existing archive, so start from nothing.
        remove_if_exists(&tmp).map_err(|e| io_err(&tmp, e))?;

        let args = self.archive_args(&tmp, manifest.objects());
        tracing::info!(
            output = %output.display(),
            objects = manifest.len(),
            "archiving"
        );
        let limits = RunLimits {
            timeout: None,
            cancel: self.cancel.clone(),
        };
        let result = match self.runner.run(&self.toolchain.archiver, &args, &limits) {
            Ok(out) if out.success() => {
                if tmp.is_file() {
                    std::fs::rename(&tmp, output).map_err(|e| io_err(output, e))
                } else {
                    Err(io_err(
                        &tmp,
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "archiver exited successfully but wrote no archive",
                        ),
                    ))
                }
            }
            Ok(out) => Err(BuildError::Archive {
                exit_code: out.exit_code,
                stderr: out.combined(),
            }),
            Err(RunError::Cancelled) => Err(BuildError::Cancelled),
            Err(RunError::TimedOut(after)) => Err(BuildError::Timeout {
                unit: output.display().to_string(),
                after,
            }),
            Err(RunError::Spawn { program, source } | RunError::Wait { program, source }) => {
                Err(io_err(Path::new(&program), source))
            }
        };

        if result.is_err() {
            let _ = remove_if_exists(&tmp);
        }
        result
    }
}

/// `<dir>/.<name>.tmp` next to `output`.
fn temp_path(output: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(output.file_name().unwrap_or_default());
    name.push(".tmp");
    output.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
