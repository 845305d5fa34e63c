//! Filesystem content store.
//!
//! Serves the status probe and chunk transfer halves of the upload protocol
//! against a local directory tree. Every target has an upload record
//! (`<meta_base>/<path>.json`) tracking declared size, bytes received and,
//! once complete, the SHA-256 of the stored object.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_protocol::{ChunkAck, ChunkRequest, ProbeRequest, ProbeStatus, StoredFile, UploadIntent};
use ferry_transfer::{calculate_file_checksum, sanitize_relative};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::StoreError;
use crate::meta::{UploadMeta, now_ms, read_meta, remove_meta, write_meta};
use crate::roots::{RootResolver, RootTarget};

/// Content store rooted in a local repository directory.
#[derive(Clone)]
pub struct LocalStore {
    repo_root: PathBuf,
    roots: Arc<dyn RootResolver>,
}

struct ResolvedTarget {
    root: RootTarget,
    rel: String,
    full: PathBuf,
    meta_path: PathBuf,
}

impl LocalStore {
    pub fn new(repo_root: impl Into<PathBuf>, roots: Arc<dyn RootResolver>) -> Self {
        Self {
            repo_root: repo_root.into(),
            roots,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn resolve(&self, root: &str, path: &str) -> Result<ResolvedTarget, StoreError> {
        let target = self.roots.resolve(root)?;
        let rel = sanitize_relative(path);
        if rel.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let full = target.base.join(&rel);
        let meta_path = target.meta_base.join(format!("{rel}.json"));
        Ok(ResolvedTarget {
            root: target,
            rel,
            full,
            meta_path,
        })
    }

    /// Reports how many bytes of a target are already stored.
    ///
    /// Never creates, truncates or records anything.
    pub async fn probe(&self, req: &ProbeRequest) -> Result<ProbeStatus, StoreError> {
        let target = self.resolve(&req.root, &req.path)?;
        let meta = read_meta(&target.meta_path).await;
        let stat_size = match tokio::fs::metadata(&target.full).await {
            Ok(m) if m.is_file() => m.len(),
            _ => 0,
        };

        if req.intent != UploadIntent::Overwrite
            && let Some(m) = &meta
            && m.size != req.size
        {
            return Err(StoreError::Conflict(format!(
                "size mismatch: {} is recorded with {} bytes, declared {}",
                target.rel, m.size, req.size
            )));
        }

        let recorded = meta.as_ref().map_or(req.size, |m| m.size);
        let (offset, complete) = match req.intent {
            UploadIntent::Resume => {
                let uploaded = meta
                    .as_ref()
                    .map_or(stat_size, |m| m.uploaded.max(stat_size));
                if uploaded > recorded {
                    return Err(StoreError::Conflict(format!(
                        "existing object at {} is larger than {} bytes",
                        target.rel, recorded
                    )));
                }
                let complete = meta.as_ref().is_some_and(|m| m.completed) && uploaded == recorded;
                (uploaded, complete)
            }
            UploadIntent::Replace | UploadIntent::Overwrite => (0, false),
        };

        let hash = if complete {
            meta.as_ref().and_then(|m| m.hash.clone())
        } else {
            None
        };
        let file = complete.then(|| self.stored_file(&target, recorded, hash.clone()));

        debug!(
            path = %target.rel,
            intent = %req.intent,
            offset,
            complete,
            "probe"
        );

        Ok(ProbeStatus {
            offset,
            complete,
            size: recorded,
            hash,
            existing: stat_size > 0 || meta.is_some(),
            file,
        })
    }

    /// Writes `body` at `req.offset` of the target.
    ///
    /// The body may carry fewer bytes than the remaining range; the returned
    /// acknowledgement then reports the smaller offset and `complete = false`.
    pub async fn put<R>(&self, req: &ChunkRequest, body: &mut R) -> Result<ChunkAck, StoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let target = self.resolve(&req.root, &req.path)?;
        if !target.root.writable {
            return Err(StoreError::RootReadOnly(target.root.key.clone()));
        }
        if req.offset > req.size {
            return Err(StoreError::InvalidRequest(format!(
                "offset {} beyond declared size {}",
                req.offset, req.size
            )));
        }

        if let Some(parent) = target.full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut meta = read_meta(&target.meta_path).await;
        if let Some(m) = &meta
            && m.size != req.size
        {
            if req.overwrite && req.offset == 0 {
                info!(path = %target.rel, "overwriting incompatible object");
                meta = None;
            } else {
                return Err(StoreError::Conflict(format!(
                    "size mismatch: {} is recorded with {} bytes, declared {}",
                    target.rel, m.size, req.size
                )));
            }
        }

        let mut file = if req.offset == 0 {
            write_meta(&target.meta_path, &UploadMeta::fresh(req.size)).await?;
            tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&target.full)
                .await?
        } else {
            let on_disk = match tokio::fs::metadata(&target.full).await {
                Ok(m) if m.is_file() => m.len(),
                _ => {
                    return Err(StoreError::Conflict(format!(
                        "missing partial file for {}",
                        target.rel
                    )));
                }
            };
            if on_disk != req.offset {
                return Err(StoreError::Conflict(format!(
                    "offset mismatch for {}: store holds {} bytes, request starts at {}",
                    target.rel, on_disk, req.offset
                )));
            }
            if meta.is_none() {
                let mut record = UploadMeta::fresh(req.size);
                record.uploaded = req.offset;
                write_meta(&target.meta_path, &record).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&target.full)
                .await?;
            file.seek(SeekFrom::Start(req.offset)).await?;
            file
        };

        let written = match tokio::io::copy(body, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                warn!(path = %target.rel, error = %e, "chunk write failed");
                remove_meta(&target.meta_path).await;
                return Err(e.into());
            }
        };
        file.flush().await?;

        let final_size = req.offset + written;
        if final_size > req.size {
            file.set_len(req.offset).await?;
            return Err(StoreError::Conflict(format!(
                "{} exceeds declared size {}",
                target.rel, req.size
            )));
        }
        drop(file);

        let complete = final_size == req.size;
        let hash = if complete {
            let full = target.full.clone();
            let digest = tokio::task::spawn_blocking(move || calculate_file_checksum(&full))
                .await
                .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
            Some(digest)
        } else {
            None
        };

        let record = UploadMeta {
            size: req.size,
            uploaded: final_size,
            completed: complete,
            hash: hash.clone(),
            updated_at: now_ms(),
        };
        write_meta(&target.meta_path, &record).await?;

        debug!(
            path = %target.rel,
            offset = req.offset,
            written,
            complete,
            "chunk stored"
        );

        let files = if complete {
            vec![self.stored_file(&target, req.size, hash)]
        } else {
            Vec::new()
        };

        Ok(ChunkAck {
            ok: true,
            complete,
            offset: final_size,
            size: req.size,
            files,
        })
    }

    fn stored_file(&self, target: &ResolvedTarget, bytes: u64, hash: Option<String>) -> StoredFile {
        let name = target
            .rel
            .rsplit('/')
            .next()
            .unwrap_or(target.rel.as_str())
            .to_string();
        let path = match target.full.strip_prefix(&self.repo_root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => target.full.to_string_lossy().into_owned(),
        };
        StoredFile {
            name,
            relative_path: target.rel.clone(),
            path,
            bytes,
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::StaticRoots;
    use ferry_transfer::checksum_bytes;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let roots = Arc::new(StaticRoots::with_defaults(dir.path()));
        let store = LocalStore::new(dir.path(), roots);
        (dir, store)
    }

    fn probe_req(path: &str, size: u64, intent: UploadIntent) -> ProbeRequest {
        ProbeRequest {
            root: "uploads".into(),
            path: path.into(),
            size,
            intent,
        }
    }

    fn chunk_req(path: &str, size: u64, offset: u64) -> ChunkRequest {
        ChunkRequest {
            root: "uploads".into(),
            path: path.into(),
            size,
            offset,
            overwrite: false,
        }
    }

    #[tokio::test]
    async fn probe_reports_zero_for_new_target() {
        let (_dir, store) = store();
        let status = store
            .probe(&probe_req("docs/sample.txt", 11, UploadIntent::Replace))
            .await
            .unwrap();
        assert_eq!(status.offset, 0);
        assert!(!status.complete);
        assert_eq!(status.size, 11);
        assert_eq!(status.hash, None);
        assert!(!status.existing);
    }

    #[tokio::test]
    async fn resumable_put_and_final_hash() {
        let (dir, store) = store();

        let first = store
            .put(&chunk_req("docs/resume.txt", 11, 0), &mut &b"hello "[..])
            .await
            .unwrap();
        assert!(first.ok);
        assert!(!first.complete);
        assert_eq!(first.offset, 6);

        let status = store
            .probe(&probe_req("docs/resume.txt", 11, UploadIntent::Resume))
            .await
            .unwrap();
        assert_eq!(status.offset, 6);
        assert!(!status.complete);

        let done = store
            .put(&chunk_req("docs/resume.txt", 11, 6), &mut &b"world"[..])
            .await
            .unwrap();
        assert!(done.complete);
        assert_eq!(done.offset, 11);
        assert_eq!(done.files.len(), 1);
        assert_eq!(done.files[0].path, "files/uploads/docs/resume.txt");
        assert_eq!(done.files[0].name, "resume.txt");
        assert_eq!(
            done.files[0].hash.as_deref(),
            Some(checksum_bytes(b"hello world").as_str())
        );

        let on_disk = std::fs::read(dir.path().join("files/uploads/docs/resume.txt")).unwrap();
        assert_eq!(&on_disk, b"hello world");

        let meta = read_meta(&dir.path().join("files/uploads/.upload-meta/docs/resume.txt.json"))
            .await
            .unwrap();
        assert!(meta.completed);
        assert_eq!(meta.uploaded, 11);
    }

    #[tokio::test]
    async fn resume_probe_reports_completed_object() {
        let (_dir, store) = store();
        store
            .put(&chunk_req("a.txt", 3, 0), &mut &b"abc"[..])
            .await
            .unwrap();

        let status = store
            .probe(&probe_req("a.txt", 3, UploadIntent::Resume))
            .await
            .unwrap();
        assert!(status.complete);
        assert_eq!(status.offset, 3);
        assert_eq!(status.hash.as_deref(), Some(checksum_bytes(b"abc").as_str()));
        assert_eq!(
            status.file.map(|f| f.path),
            Some("files/uploads/a.txt".to_string())
        );

        let replace = store
            .probe(&probe_req("a.txt", 3, UploadIntent::Replace))
            .await
            .unwrap();
        assert_eq!(replace.offset, 0);
        assert!(!replace.complete);
        assert!(replace.existing);
    }

    #[tokio::test]
    async fn put_rejects_mismatched_offset() {
        let (_dir, store) = store();
        store
            .put(&chunk_req("docs/mismatch.txt", 6, 0), &mut &b"fir"[..])
            .await
            .unwrap();

        let err = store
            .put(&chunk_req("docs/mismatch.txt", 6, 2), &mut &b"oops"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(msg) if msg.contains("offset mismatch")));
    }

    #[tokio::test]
    async fn size_mismatch_is_conflict_until_overwrite() {
        let (dir, store) = store();
        store
            .put(&chunk_req("docs/x.bin", 10, 0), &mut &b"12345"[..])
            .await
            .unwrap();

        let err = store
            .probe(&probe_req("docs/x.bin", 4, UploadIntent::Replace))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store
            .put(&chunk_req("docs/x.bin", 4, 0), &mut &b"abcd"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let status = store
            .probe(&probe_req("docs/x.bin", 4, UploadIntent::Overwrite))
            .await
            .unwrap();
        assert_eq!(status.offset, 0);

        let mut forced = chunk_req("docs/x.bin", 4, 0);
        forced.overwrite = true;
        let ack = store.put(&forced, &mut &b"abcd"[..]).await.unwrap();
        assert!(ack.complete);
        assert_eq!(
            std::fs::read(dir.path().join("files/uploads/docs/x.bin")).unwrap(),
            b"abcd"
        );
    }

    #[tokio::test]
    async fn oversized_body_is_discarded() {
        let (dir, store) = store();
        let err = store
            .put(&chunk_req("big.txt", 3, 0), &mut &b"too long"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let len = std::fs::metadata(dir.path().join("files/uploads/big.txt"))
            .unwrap()
            .len();
        assert_eq!(len, 0);
    }

    #[tokio::test]
    async fn resume_uses_bytes_on_disk_without_record() {
        let (dir, store) = store();
        let full = dir.path().join("files/uploads/docs/p.txt");
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, b"1234").unwrap();

        let status = store
            .probe(&probe_req("docs/p.txt", 8, UploadIntent::Resume))
            .await
            .unwrap();
        assert_eq!(status.offset, 4);
        assert!(status.existing);

        let ack = store
            .put(&chunk_req("docs/p.txt", 8, 4), &mut &b"5678"[..])
            .await
            .unwrap();
        assert!(ack.complete);
    }

    #[tokio::test]
    async fn traversal_is_contained() {
        let (dir, store) = store();
        let ack = store
            .put(&chunk_req("../../escape.txt", 2, 0), &mut &b"hi"[..])
            .await
            .unwrap();
        assert_eq!(ack.files[0].relative_path, "escape.txt");
        assert!(dir.path().join("files/uploads/escape.txt").exists());

        let ack = store
            .put(&chunk_req("C:\\Users\\evil.txt", 2, 0), &mut &b"hi"[..])
            .await
            .unwrap();
        assert_eq!(ack.files[0].relative_path, "Users/evil.txt");
        assert!(dir.path().join("files/uploads/Users/evil.txt").exists());
    }

    #[tokio::test]
    async fn empty_path_rejected() {
        let (_dir, store) = store();
        let err = store
            .probe(&probe_req("../..", 1, UploadIntent::Replace))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn read_only_root_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let roots = Arc::new(StaticRoots::new(
            dir.path(),
            [crate::roots::RootConfig {
                writable: false,
                ..crate::roots::RootConfig::uploads()
            }],
        ));
        let store = LocalStore::new(dir.path(), roots);
        let err = store
            .put(&chunk_req("a.txt", 1, 0), &mut &b"a"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RootReadOnly(_)));
    }
}
