//! Compilation units: one source file mapped to one object file.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// One source file and the object file it compiles to.
///
/// The `id` is the source file name without its suffix and is unique within
/// a source directory. Units are created by discovery and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilationUnit {
    id: String,
    source_path: PathBuf,
    object_path: PathBuf,
}

impl CompilationUnit {
    /// Creates a unit from its parts.
    pub fn new(id: impl Into<String>, source_path: PathBuf, object_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            source_path,
            object_path,
        }
    }

    /// The unit name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the source file.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Path the compiled object is written to.
    pub fn object_path(&self) -> &Path {
        &self.object_path
    }
}
