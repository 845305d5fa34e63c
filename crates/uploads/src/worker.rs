//! Transfer worker: probe one file, then send its remaining range.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ferry_protocol::{ChunkAck, ChunkRequest, ProbeRequest, ProbeStatus, StoredFile, UploadIntent};
use ferry_transfer::open_range;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{Engine, JobEntry};
use crate::error::UploadError;
use crate::events::UploadEvent;
use crate::job::{AbortReason, FileStatus, Job, JobStatus};
use crate::remote::ChunkBody;

/// Result of one worker invocation.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The whole range was stored.
    Success,
    /// The remote accepted less than the range; `offset` is what it holds.
    Partial { offset: u64 },
    /// The remote already held the complete object.
    Skipped,
    Paused,
    Cancelled,
    Error(UploadError),
}

struct Plan {
    job_id: String,
    relative_path: String,
    source: PathBuf,
    size: u64,
    root: String,
    target: String,
    intent: UploadIntent,
    overwrite: bool,
}

/// Transfers file `index` of the job.
///
/// Files are never sent concurrently within one job: the caller awaits this
/// before picking the next file.
pub(crate) async fn transfer(
    engine: &Engine,
    entry: &Arc<JobEntry>,
    index: usize,
    cancel: &CancellationToken,
) -> Outcome {
    let plan = {
        let mut job = entry.write();
        if cancel.is_cancelled() {
            return aborted(entry, &mut job, index);
        }
        match begin(&mut job, index) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Error(e),
        }
    };

    let probe = ProbeRequest {
        root: plan.root.clone(),
        path: plan.target.clone(),
        size: plan.size,
        intent: plan.intent,
    };
    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let mut job = entry.write();
            return aborted(entry, &mut job, index);
        }
        r = engine.remote.probe(&probe) => r,
    };

    let offset = {
        let mut job = entry.write();
        match status.and_then(|s| check_probe(&plan, s)) {
            Err(e) => return failed(&mut job, index, e),
            Ok(status) if status.complete => {
                let stored = status.file.unwrap_or_else(|| fallback_stored(&plan));
                return match finish(engine, &mut job, &plan, index, stored, true) {
                    Ok(()) => Outcome::Skipped,
                    Err(e) => Outcome::Error(e),
                };
            }
            Ok(status) => {
                if job.files[index].sync_remote(status.offset) {
                    emit_progress(engine, &job, &plan);
                }
                let file = &mut job.files[index];
                if let Err(e) = file.set_status(FileStatus::Uploading) {
                    return failed(&mut job, index, e);
                }
                if let Err(e) = engine.transition(entry, &mut job, JobStatus::Uploading) {
                    return failed(&mut job, index, e);
                }
                status.offset
            }
        }
    };

    debug!(
        job = %plan.job_id,
        path = %plan.target,
        intent = %plan.intent,
        offset,
        bytes = plan.size - offset,
        "sending range"
    );

    let reader = match open_range(&plan.source, offset, plan.size).await {
        Ok(reader) => reader,
        Err(e) => {
            let mut job = entry.write();
            return failed(&mut job, index, e.into());
        }
    };
    let body: ChunkBody = Box::new(ProgressReader::new(
        reader,
        progress_callback(engine, entry, index, offset, &plan),
    ));

    let req = ChunkRequest {
        root: plan.root.clone(),
        path: plan.target.clone(),
        size: plan.size,
        offset,
        overwrite: plan.overwrite,
    };
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let mut job = entry.write();
            note_overwrite(&mut job, index, &plan, false);
            return aborted(entry, &mut job, index);
        }
        r = engine.remote.put_range(&req, body) => r,
    };

    let mut job = entry.write();
    note_overwrite(&mut job, index, &plan, result.is_ok());
    match result.and_then(|ack| check_ack(&plan, offset, ack)) {
        Err(e) => failed(&mut job, index, e),
        Ok(ack) if ack.complete => {
            let stored = ack
                .files
                .into_iter()
                .next()
                .unwrap_or_else(|| fallback_stored(&plan));
            match finish(engine, &mut job, &plan, index, stored, false) {
                Ok(()) => Outcome::Success,
                Err(e) => Outcome::Error(e),
            }
        }
        Ok(ack) => {
            job.inflight = false;
            if job.files[index].sync_remote(ack.offset) {
                emit_progress(engine, &job, &plan);
            }
            let file = &mut job.files[index];
            file.attempted = true;
            if let Err(e) = file.set_status(FileStatus::Pending) {
                return failed(&mut job, index, e);
            }
            info!(
                job = %plan.job_id,
                path = %plan.target,
                offset = ack.offset,
                size = plan.size,
                "remote accepted part of the range"
            );
            Outcome::Partial { offset: ack.offset }
        }
    }
}

fn begin(job: &mut Job, index: usize) -> Result<Plan, UploadError> {
    let overwrite = job.overwrite;
    let job_id = job.id.clone();
    let root = job.destination.root.clone();
    let target = job.destination.target_path(job.files[index].relative_path());

    let file = &mut job.files[index];
    file.set_status(FileStatus::Checking)?;
    let intent = if overwrite && !file.overwritten {
        UploadIntent::Overwrite
    } else if file.uploaded > 0 || file.attempted {
        UploadIntent::Resume
    } else {
        UploadIntent::Replace
    };
    let plan = Plan {
        job_id,
        relative_path: file.relative_path().to_string(),
        source: file.source.source.clone(),
        size: file.size(),
        root,
        target,
        intent,
        overwrite: intent == UploadIntent::Overwrite,
    };
    job.inflight = true;
    Ok(plan)
}

fn check_probe(plan: &Plan, status: ProbeStatus) -> Result<ProbeStatus, UploadError> {
    if status.offset > plan.size {
        return Err(UploadError::Protocol(format!(
            "probe for {} reported offset {} beyond size {}",
            plan.target, status.offset, plan.size
        )));
    }
    if status.complete && status.offset != plan.size {
        return Err(UploadError::Protocol(format!(
            "probe for {} reported complete at offset {} of {} bytes",
            plan.target, status.offset, plan.size
        )));
    }
    Ok(status)
}

/// Marks the forced overwrite as spent once the remote took part of the body
/// or answered the request.
fn note_overwrite(job: &mut Job, index: usize, plan: &Plan, answered: bool) {
    let file = &mut job.files[index];
    if plan.intent == UploadIntent::Overwrite && (answered || file.uploaded > 0) {
        file.overwritten = true;
    }
}

fn emit_progress(engine: &Engine, job: &Job, plan: &Plan) {
    engine.emit(UploadEvent::Progress {
        job_id: plan.job_id.clone(),
        relative_path: plan.relative_path.clone(),
        uploaded_bytes: job.uploaded_bytes(),
        total_bytes: job.total_bytes(),
        progress: job.progress(),
    });
}

fn check_ack(plan: &Plan, offset: u64, ack: ChunkAck) -> Result<ChunkAck, UploadError> {
    if ack.offset > plan.size || (ack.complete && ack.offset != plan.size) {
        return Err(UploadError::Protocol(format!(
            "ack for {} reported offset {} of {} bytes",
            plan.target, ack.offset, plan.size
        )));
    }
    if !ack.complete && ack.offset < offset {
        return Err(UploadError::Protocol(format!(
            "ack for {} went back from {} to {}",
            plan.target, offset, ack.offset
        )));
    }
    Ok(ack)
}

fn finish(
    engine: &Engine,
    job: &mut Job,
    plan: &Plan,
    index: usize,
    stored: StoredFile,
    skipped: bool,
) -> Result<(), UploadError> {
    job.inflight = false;
    if let Err(e) = job.files[index].mark_done(stored) {
        job.files[index].mark_error(e.to_string());
        return Err(e);
    }
    debug!(job = %plan.job_id, path = %plan.target, skipped, "file stored");
    engine.emit(UploadEvent::FileDone {
        job_id: plan.job_id.clone(),
        relative_path: plan.relative_path.clone(),
        skipped,
    });
    Ok(())
}

fn failed(job: &mut Job, index: usize, err: UploadError) -> Outcome {
    job.inflight = false;
    job.files[index].mark_error(err.to_string());
    Outcome::Error(err)
}

/// Settles the file after the run's token fired.
fn aborted(entry: &JobEntry, job: &mut Job, index: usize) -> Outcome {
    job.inflight = false;
    let reason = job.abort;
    let file = &mut job.files[index];
    let outcome = match reason {
        AbortReason::Pause => {
            file.attempted = true;
            file.status = FileStatus::Paused;
            Outcome::Paused
        }
        AbortReason::Remove | AbortReason::None => {
            file.mark_error("transfer cancelled".into());
            Outcome::Cancelled
        }
    };
    entry.publish(job);
    outcome
}

fn fallback_stored(plan: &Plan) -> StoredFile {
    let name = plan
        .target
        .rsplit('/')
        .next()
        .unwrap_or(plan.target.as_str())
        .to_string();
    StoredFile {
        name,
        relative_path: plan.target.clone(),
        path: plan.target.clone(),
        bytes: plan.size,
        hash: None,
    }
}

type ReadCallback = Box<dyn FnMut(u64) + Send + Sync>;

/// Raises the file's `uploaded` as the transport consumes the body.
fn progress_callback(
    engine: &Engine,
    entry: &Arc<JobEntry>,
    index: usize,
    offset: u64,
    plan: &Plan,
) -> ReadCallback {
    let entry = Arc::clone(entry);
    let events = engine.events.clone();
    let job_id = plan.job_id.clone();
    let relative_path = plan.relative_path.clone();
    let mut sent = 0u64;

    Box::new(move |n| {
        sent += n;
        let mut job = entry.write();
        job.speed.add_sample(n);
        if job.files[index].advance(offset + sent) {
            let _ = events.try_send(UploadEvent::Progress {
                job_id: job_id.clone(),
                relative_path: relative_path.clone(),
                uploaded_bytes: job.uploaded_bytes(),
                total_bytes: job.total_bytes(),
                progress: job.progress(),
            });
        }
    })
}

/// Reader wrapper reporting every chunk handed to the transport.
struct ProgressReader<R> {
    inner: R,
    on_read: ReadCallback,
}

impl<R> ProgressReader<R> {
    fn new(inner: R, on_read: ReadCallback) -> Self {
        Self { inner, on_read }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                (this.on_read)(n as u64);
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn progress_reader_reports_every_read() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut reader = ProgressReader::new(
            std::io::Cursor::new(vec![7u8; 10_000]),
            Box::new(move |n| sink.lock().unwrap().push(n)),
        );

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 10_000);
        let total: u64 = seen.lock().unwrap().iter().sum();
        assert_eq!(total, 10_000);
    }

    fn plan() -> Plan {
        Plan {
            job_id: "j".into(),
            relative_path: "a.txt".into(),
            source: PathBuf::from("/tmp/a.txt"),
            size: 10,
            root: "uploads".into(),
            target: "docs/a.txt".into(),
            intent: UploadIntent::Replace,
            overwrite: false,
        }
    }

    #[test]
    fn complete_status_must_cover_size() {
        let plan = plan();
        let status = |complete, offset| ProbeStatus {
            offset,
            complete,
            size: 10,
            hash: None,
            existing: true,
            file: None,
        };
        assert!(check_probe(&plan, status(true, 10)).is_ok());
        assert!(check_probe(&plan, status(false, 3)).is_ok());
        assert!(matches!(
            check_probe(&plan, status(true, 3)),
            Err(UploadError::Protocol(_))
        ));
        assert!(check_probe(&plan, status(false, 11)).is_err());
    }

    #[test]
    fn ack_must_not_exceed_size() {
        let plan = plan();
        let ack = |complete, offset| ChunkAck {
            ok: true,
            complete,
            offset,
            size: 10,
            files: vec![],
        };
        assert!(check_ack(&plan, 0, ack(true, 10)).is_ok());
        assert!(check_ack(&plan, 0, ack(false, 4)).is_ok());
        assert!(check_ack(&plan, 0, ack(true, 9)).is_err());
        assert!(check_ack(&plan, 0, ack(false, 11)).is_err());
        assert!(check_ack(&plan, 6, ack(false, 4)).is_err());

        let stored = fallback_stored(&plan);
        assert_eq!(stored.name, "a.txt");
        assert_eq!(stored.path, "docs/a.txt");
    }
}
