use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What the user picked or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Individual files from a file picker; each lands at its file name.
    Files(Vec<PathBuf>),
    /// One directory from a directory picker, expanded recursively.
    Directory(PathBuf),
    /// A drag-and-drop payload mixing files and folders.
    Drop(Vec<PathBuf>),
}

/// One enumerated file, ready to be staged into a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path from the root of the selected item, `/` separated.
    pub relative_path: String,
    /// Readable byte source on the local host.
    pub source: PathBuf,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ms: i64,
}

impl SourceFile {
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Snapshot used later by the integrity check.
    pub fn staged(&self) -> StagedEntry {
        StagedEntry {
            relative_path: self.relative_path.clone(),
            size: self.size,
            modified_ms: self.modified_ms,
        }
    }
}

/// Immutable size/mtime snapshot of one file, captured at staging time.
///
/// Serializable so callers may persist it between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedEntry {
    pub relative_path: String,
    pub size: u64,
    pub modified_ms: i64,
}

/// Live metadata read back from a source handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStat {
    pub size: u64,
    pub modified_ms: i64,
}
