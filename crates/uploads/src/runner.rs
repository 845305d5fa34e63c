//! One run of a job: wait for a slot, transfer files in order, finalize.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::{Engine, JobEntry};
use crate::error::UploadError;
use crate::finalize::finalize;
use crate::job::{FileStatus, JobStatus};
use crate::worker::{Outcome, transfer};

pub(crate) async fn run(engine: Arc<Engine>, entry: Arc<JobEntry>, cancel: CancellationToken) {
    let job_id = entry.read().id.clone();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let mut job = entry.write();
            engine.settle_paused(&entry, &mut job);
            return;
        }
        permit = Arc::clone(&engine.permits).acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        let mut job = entry.write();
        engine.fail(&entry, &mut job, &UploadError::Protocol("scheduler shut down".into()));
        return;
    };

    {
        let mut job = entry.write();
        if cancel.is_cancelled() {
            engine.settle_paused(&entry, &mut job);
            return;
        }
        if let Err(e) = engine.transition(&entry, &mut job, JobStatus::Checking) {
            engine.fail(&entry, &mut job, &e);
            return;
        }
    }
    debug!(job = %job_id, "run started");

    let max_stalled = engine.config.max_stalled_partials.max(1);
    let mut stalled = 0u32;
    let mut last_partial: Option<(usize, u64)> = None;

    loop {
        let next = entry
            .read()
            .files
            .iter()
            .position(|f| f.status != FileStatus::Done);
        let Some(index) = next else {
            break;
        };

        match transfer(&engine, &entry, index, &cancel).await {
            Outcome::Success | Outcome::Skipped => {
                stalled = 0;
                last_partial = None;
            }
            Outcome::Partial { offset } => {
                if last_partial.is_some_and(|(i, prev)| i == index && offset <= prev) {
                    stalled += 1;
                } else {
                    stalled = 0;
                }
                last_partial = Some((index, offset));
                if stalled >= max_stalled {
                    let mut job = entry.write();
                    let path = job.files[index].relative_path().to_string();
                    let err = UploadError::Protocol(format!(
                        "remote stopped accepting {path} at offset {offset}"
                    ));
                    job.files[index].mark_error(err.to_string());
                    engine.fail(&entry, &mut job, &err);
                    return;
                }
            }
            Outcome::Paused | Outcome::Cancelled => {
                let mut job = entry.write();
                debug!(job = %job_id, "run interrupted");
                engine.settle_paused(&entry, &mut job);
                return;
            }
            Outcome::Error(e) => {
                let mut job = entry.write();
                warn!(job = %job_id, file = index, error = %e, "transfer failed");
                engine.fail(&entry, &mut job, &e);
                return;
            }
        }
    }

    finalize(&engine, &entry, &cancel).await;
}
