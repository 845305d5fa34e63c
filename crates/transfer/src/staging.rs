//! Staging snapshots and the integrity check run before every (re)start.
//!
//! A staged job remembers the size and modification time each source had
//! when it was selected. Before any bytes move, the live metadata is read
//! back and compared; a paused job whose sources were swapped or touched
//! must not resume at a stale offset.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::TransferError;
use crate::types::{SourceFile, SourceStat, StagedEntry};

/// Why a staged job no longer matches its sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyMismatch {
    #[error("staged {staged} files but job holds {live}")]
    CountMismatch { staged: usize, live: usize },

    #[error("no staged record for {0}")]
    Missing(String),

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error(
        "{path} changed since staging (size {staged_size} -> {live_size}, \
         modified {staged_ms} -> {live_ms})"
    )]
    Changed {
        path: String,
        staged_size: u64,
        live_size: u64,
        staged_ms: i64,
        live_ms: i64,
    },
}

/// Converts a filesystem timestamp to milliseconds since the Unix epoch.
pub fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Reads live size and modification time of a source.
pub fn stat_source(path: &Path) -> Result<SourceStat, TransferError> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(TransferError::NotAFile(path.display().to_string()));
    }
    Ok(SourceStat {
        size: metadata.len(),
        modified_ms: system_time_ms(metadata.modified()?),
    })
}

/// Captures the staging snapshot for a set of files.
pub fn snapshot<'a>(files: impl IntoIterator<Item = &'a SourceFile>) -> Vec<StagedEntry> {
    files.into_iter().map(SourceFile::staged).collect()
}

/// Compares every file's live metadata with its staged record.
///
/// Records are matched by relative path. Never touches the network.
pub fn verify_staged<'a>(
    files: impl IntoIterator<Item = &'a SourceFile>,
    staged: &[StagedEntry],
) -> Result<(), VerifyMismatch> {
    let files: Vec<&SourceFile> = files.into_iter().collect();
    if files.len() != staged.len() {
        return Err(VerifyMismatch::CountMismatch {
            staged: staged.len(),
            live: files.len(),
        });
    }

    let by_path: HashMap<&str, &StagedEntry> = staged
        .iter()
        .map(|entry| (entry.relative_path.as_str(), entry))
        .collect();

    for file in files {
        let Some(record) = by_path.get(file.relative_path.as_str()) else {
            return Err(VerifyMismatch::Missing(file.relative_path.clone()));
        };

        let live = stat_source(file.source()).map_err(|e| VerifyMismatch::Unreadable {
            path: file.relative_path.clone(),
            reason: e.to_string(),
        })?;

        if live.size != record.size || live.modified_ms != record.modified_ms {
            warn!(
                path = %file.relative_path,
                staged_size = record.size,
                live_size = live.size,
                "source changed since staging"
            );
            return Err(VerifyMismatch::Changed {
                path: file.relative_path.clone(),
                staged_size: record.size,
                live_size: live.size,
                staged_ms: record.modified_ms,
                live_ms: live.modified_ms,
            });
        }
    }

    debug!(files = staged.len(), "staged sources verified");
    Ok(())
}
