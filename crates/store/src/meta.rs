use std::path::Path;
use std::time::SystemTime;

use ferry_transfer::system_time_ms;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StoreError;

/// Per-target upload record kept next to the stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMeta {
    pub size: u64,
    #[serde(default)]
    pub uploaded: u64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub updated_at: i64,
}

impl UploadMeta {
    /// Record of a target that has received nothing yet.
    pub fn fresh(size: u64) -> Self {
        Self {
            size,
            uploaded: 0,
            completed: false,
            hash: None,
            updated_at: now_ms(),
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    system_time_ms(SystemTime::now())
}

/// Reads a record; a missing or malformed file counts as no record.
pub async fn read_meta(path: &Path) -> Option<UploadMeta> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice::<UploadMeta>(&raw) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring malformed upload record");
            None
        }
    }
}

pub async fn write_meta(path: &Path, meta: &UploadMeta) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(meta)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

pub async fn remove_meta(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %e, "failed to remove upload record");
    }
}
