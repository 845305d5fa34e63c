//! Library registry.
//!
//! Completed uploads are registered as library entries so the rest of the
//! system can reference them. Entries persist as a JSON array in a single
//! file, rewritten atomically on every change.

use std::path::{Path, PathBuf};

use ferry_protocol::{LibraryKind, RegistrationRequest, RegistrationResponse};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::info;

use crate::StoreError;
use crate::meta::now_ms;

/// Length of the hex prefix used as an entry id.
const ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub id: String,
    /// Repository-relative path of the registered object.
    pub path: String,
    pub kind: LibraryKind,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

pub struct Library {
    repo_root: PathBuf,
    file: PathBuf,
    lock: Mutex<()>,
}

impl Library {
    /// Registry persisted at `file`; registered paths resolve against `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            file: file.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<LibraryEntry>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Registers `req.path`, or relabels it when already registered.
    pub async fn register(
        &self,
        req: &RegistrationRequest,
    ) -> Result<RegistrationResponse, StoreError> {
        let rel = req.path.trim().trim_start_matches('/').replace('\\', "/");
        if rel.is_empty() {
            return Err(StoreError::InvalidRequest("path is required".into()));
        }
        let abs = self.repo_root.join(&rel);
        let Ok(metadata) = tokio::fs::metadata(&abs).await else {
            return Err(StoreError::InvalidPath(format!("path not found: {rel}")));
        };
        let kind = match req.kind {
            Some(kind) => kind,
            None => detect_kind(&abs, &metadata).await?,
        };

        let id = entry_id(&abs);
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;

        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => {
                if req.label.is_some() {
                    existing.label = req.label.clone();
                }
            }
            None => {
                info!(id = %id, path = %rel, kind = ?kind, "registered library entry");
                entries.push(LibraryEntry {
                    id: id.clone(),
                    path: rel,
                    kind,
                    created_at: now_ms(),
                    label: req.label.clone(),
                });
            }
        }

        self.save(&entries).await?;
        Ok(RegistrationResponse { ok: true, id })
    }

    async fn load(&self) -> Result<Vec<LibraryEntry>, StoreError> {
        match tokio::fs::read(&self.file).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &[LibraryEntry]) -> Result<(), StoreError> {
        if let Some(parent) = self.file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.file.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.file).await?;
        Ok(())
    }
}

/// Kind of an existing path: a file, a plain directory, or a directory
/// holding a Next.js project (`next` dependency plus `app/` or `pages/`).
async fn detect_kind(abs: &Path, metadata: &std::fs::Metadata) -> Result<LibraryKind, StoreError> {
    if metadata.is_file() {
        return Ok(LibraryKind::File);
    }
    if !metadata.is_dir() {
        return Err(StoreError::InvalidPath(format!(
            "unsupported path: {}",
            abs.display()
        )));
    }

    let manifest = tokio::fs::read(abs.join("package.json")).await.ok();
    let uses_next = manifest
        .and_then(|raw| serde_json::from_slice::<serde_json::Value>(&raw).ok())
        .is_some_and(|pkg| {
            ["dependencies", "devDependencies"]
                .iter()
                .any(|section| pkg.get(section).and_then(|deps| deps.get("next")).is_some())
        });
    if uses_next {
        for dir in ["app", "pages"] {
            if tokio::fs::metadata(abs.join(dir)).await.is_ok() {
                return Ok(LibraryKind::App);
            }
        }
    }
    Ok(LibraryKind::Dir)
}

fn entry_id(abs: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(abs.to_string_lossy().as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_LEN);
    id
}
