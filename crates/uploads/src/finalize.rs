//! Merges per-file acknowledgements into one library registration.

use std::sync::Arc;

use ferry_protocol::{LibraryKind, RegistrationRequest, StoredFile};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{Engine, JobEntry};
use crate::error::UploadError;
use crate::events::UploadEvent;
use crate::job::{Job, JobStatus};

/// Deepest directory containing every path, `/` separated.
///
/// `None` when the paths share no leading directory.
pub fn common_ancestor<'a>(paths: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut common: Option<Vec<&str>> = None;
    for path in paths {
        let mut dirs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        dirs.pop();
        common = Some(match common {
            None => dirs,
            Some(prev) => prev
                .iter()
                .zip(dirs.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| *a)
                .collect(),
        });
    }
    common.filter(|dirs| !dirs.is_empty()).map(|dirs| dirs.join("/"))
}

/// Builds the registration for a job whose files are all `done`.
pub fn build_registration(job: &Job) -> Result<RegistrationRequest, UploadError> {
    let stored: Vec<StoredFile> = job
        .files
        .iter()
        .map(|f| {
            f.stored.clone().ok_or_else(|| {
                UploadError::Registration(format!("{} has no stored object", f.relative_path()))
            })
        })
        .collect::<Result<_, _>>()?;

    let (path, kind) = match stored.as_slice() {
        [] => return Err(UploadError::Registration("job has no files".into())),
        [single] => (single.path.clone(), LibraryKind::File),
        many => {
            let ancestor = common_ancestor(many.iter().map(|f| f.path.as_str())).ok_or_else(|| {
                UploadError::Registration("stored files share no common directory".into())
            })?;
            (ancestor, LibraryKind::Dir)
        }
    };

    Ok(RegistrationRequest {
        path,
        kind: Some(kind),
        label: job.label.clone(),
        files: stored,
    })
}

/// Registers the job, moving it to `done` or `error`.
///
/// Only reached when every file is `done`.
pub(crate) async fn finalize(engine: &Arc<Engine>, entry: &Arc<JobEntry>, cancel: &CancellationToken) {
    let request = {
        let mut job = entry.write();
        if cancel.is_cancelled() {
            engine.settle_paused(entry, &mut job);
            return;
        }
        if !job.all_done() {
            let err = UploadError::Registration("finalization reached with unfinished files".into());
            engine.fail(entry, &mut job, &err);
            return;
        }
        if let Err(e) = engine.transition(entry, &mut job, JobStatus::Finalizing) {
            engine.fail(entry, &mut job, &e);
            return;
        }
        match build_registration(&job) {
            Ok(req) => {
                job.inflight = true;
                req
            }
            Err(e) => {
                engine.fail(entry, &mut job, &e);
                return;
            }
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let mut job = entry.write();
            debug!(job = %job.id, reason = ?job.abort, "registration abandoned");
            engine.settle_paused(entry, &mut job);
            return;
        }
        r = engine.registrar.register(&request) => r,
    };

    let mut job = entry.write();
    job.inflight = false;
    let response = match result {
        Ok(resp) => resp,
        Err(e) => {
            let err = match e {
                UploadError::Registration(_) => e,
                other => UploadError::Registration(other.to_string()),
            };
            engine.fail(entry, &mut job, &err);
            return;
        }
    };

    job.registration = Some(response.id.clone());
    job.processing = false;
    job.run = None;
    if let Err(e) = engine.transition(entry, &mut job, JobStatus::Done) {
        engine.fail(entry, &mut job, &e);
        return;
    }
    entry.publish(&job);
    info!(
        job = %job.id,
        library_id = %response.id,
        path = %request.path,
        kind = ?request.kind,
        "job registered"
    );
    engine.emit(UploadEvent::Completed {
        job_id: job.id.clone(),
        library_id: response.id,
    });

    let id = job.id.clone();
    drop(job);
    let engine = Arc::clone(engine);
    let grace = engine.config.done_grace();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        engine.remove_if_done(&id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_protocol::Destination;
    use ferry_transfer::SourceFile;
    use std::path::PathBuf;

    fn stored(path: &str) -> StoredFile {
        StoredFile {
            name: path.rsplit('/').next().unwrap().into(),
            relative_path: path.into(),
            path: format!("files/uploads/{path}"),
            bytes: 1,
            hash: None,
        }
    }

    fn done_job(paths: &[&str]) -> Job {
        let files = paths
            .iter()
            .map(|p| SourceFile {
                relative_path: p.to_string(),
                source: PathBuf::from("/tmp").join(p),
                size: 1,
                modified_ms: 0,
            })
            .collect();
        let mut job = Job::new(files, Destination::new("uploads", ""), Some("Guide".into()), 0);
        for (file, path) in job.files.iter_mut().zip(paths) {
            file.status = crate::job::FileStatus::Done;
            file.uploaded = 1;
            file.stored = Some(stored(path));
        }
        job
    }

    #[test]
    fn common_ancestor_of_siblings_and_nested() {
        assert_eq!(
            common_ancestor(["docs/guide/a.md", "docs/guide/img/b.png"]),
            Some("docs/guide".into())
        );
        assert_eq!(
            common_ancestor(["docs/guide/a.md", "docs/api/b.md"]),
            Some("docs".into())
        );
        assert_eq!(common_ancestor(["a.md", "b.md"]), None);
        assert_eq!(common_ancestor(["x/a.md", "y/b.md"]), None);
    }

    #[test]
    fn single_file_registers_file() {
        let job = done_job(&["docs/a.md"]);
        let req = build_registration(&job).unwrap();
        assert_eq!(req.kind, Some(LibraryKind::File));
        assert_eq!(req.path, "files/uploads/docs/a.md");
        assert_eq!(req.label.as_deref(), Some("Guide"));
    }

    #[test]
    fn many_files_register_directory() {
        let job = done_job(&["docs/guide/a.md", "docs/guide/b.md", "docs/guide/img/c.png"]);
        let req = build_registration(&job).unwrap();
        assert_eq!(req.kind, Some(LibraryKind::Dir));
        assert_eq!(req.path, "files/uploads/docs/guide");
        assert_eq!(req.files.len(), 3);
    }

    #[test]
    fn missing_ack_is_registration_error() {
        let mut job = done_job(&["a.md", "b.md"]);
        job.files[1].stored = None;
        let err = build_registration(&job).unwrap_err();
        assert!(matches!(err, UploadError::Registration(_)));
    }
}
