//! Job registry and control surface.
//!
//! Every operation on an unknown id is a no-op: `false` or `None`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ferry_protocol::Destination;
use ferry_transfer::{Selection, SourceFile, enumerate, system_time_ms, verify_staged};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{Engine, JobEntry};
use crate::error::{FailureKind, UploadError};
use crate::events::UploadEvent;
use crate::job::{AbortReason, FileStatus, Job, JobSnapshot, JobStatus};
use crate::remote::{LibraryRegistrar, RemoteStore};
use crate::runner;

/// Holds all upload jobs and runs them against one remote store.
pub struct UploadScheduler {
    engine: Arc<Engine>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadScheduler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        registrar: Arc<dyn LibraryRegistrar>,
        config: EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            engine: Arc::new(Engine {
                remote,
                registrar,
                config,
                permits,
                events: events_tx,
                jobs: Mutex::new(HashMap::new()),
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// Enumerates a selection into a new `ready` job.
    ///
    /// Returns `None` when the selection holds no readable file.
    pub fn stage(
        &self,
        selection: &Selection,
        destination: Destination,
        label: Option<String>,
    ) -> Option<String> {
        self.stage_files(enumerate(selection), destination, label)
    }

    pub fn stage_files(
        &self,
        files: Vec<SourceFile>,
        destination: Destination,
        label: Option<String>,
    ) -> Option<String> {
        if files.is_empty() {
            warn!("nothing to stage");
            return None;
        }

        let job = Job::new(files, destination, label, system_time_ms(SystemTime::now()));
        let id = job.id.clone();
        let event = UploadEvent::Staged {
            job_id: id.clone(),
            files: job.files.len(),
            total_bytes: job.total_bytes(),
        };
        info!(
            job = %id,
            files = job.files.len(),
            total_bytes = job.total_bytes(),
            root = %job.destination.root,
            prefix = %job.destination.prefix,
            "job staged"
        );

        self.engine
            .jobs
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::new(JobEntry::new(job)));
        self.engine.emit(event);
        Some(id)
    }

    /// Verifies the staged sources and launches a run.
    ///
    /// Returns `false` when the job is already running, is done, or failed
    /// verification (the job is then in `error`).
    pub fn start(&self, id: &str) -> bool {
        let Some(entry) = self.engine.get(id) else {
            return false;
        };

        let token = {
            let mut job = entry.write();
            if job.processing || job.status == JobStatus::Done {
                debug!(job = %id, status = %job.status, "start ignored");
                return false;
            }

            if let Err(mismatch) = verify_staged(job.files.iter().map(|f| &f.source), &job.staged)
            {
                let err = UploadError::Verification(mismatch);
                self.engine.fail(&entry, &mut job, &err);
                return false;
            }

            // Fresh run: anything not stored is pending again.
            for file in job.files.iter_mut().filter(|f| f.status != FileStatus::Done) {
                if file.status != FileStatus::Pending {
                    file.attempted = true;
                }
                file.status = FileStatus::Pending;
                file.error = None;
            }
            job.processing = true;
            job.pause_requested = false;
            job.failure = None;
            job.abort = AbortReason::None;
            job.inflight = false;
            job.speed.reset();

            if let Err(e) = self.engine.transition(&entry, &mut job, JobStatus::Queued) {
                self.engine.fail(&entry, &mut job, &e);
                return false;
            }
            let token = CancellationToken::new();
            job.run = Some(token.clone());
            entry.publish(&job);
            token
        };

        tokio::spawn(runner::run(Arc::clone(&self.engine), entry, token));
        true
    }

    /// Requests a pause. A job with nothing in flight pauses immediately;
    /// otherwise the active request is aborted and the run settles in `paused`.
    pub fn pause(&self, id: &str) -> bool {
        let Some(entry) = self.engine.get(id) else {
            return false;
        };
        let mut job = entry.write();
        if !job.processing && !job.status.is_active() {
            return false;
        }

        job.pause_requested = true;
        job.abort = AbortReason::Pause;
        if let Some(token) = &job.run {
            token.cancel();
        }
        if !job.inflight
            && let Err(e) = self.engine.transition(&entry, &mut job, JobStatus::Paused)
        {
            debug!(job = %id, error = %e, "pause deferred to the run");
        }
        info!(job = %id, "pause requested");
        true
    }

    /// Restarts a `paused` or `error` job.
    ///
    /// A conflict stays blocking until `force_overwrite` or `retarget`.
    pub fn resume(&self, id: &str) -> bool {
        let Some(entry) = self.engine.get(id) else {
            return false;
        };
        {
            let job = entry.read();
            if !matches!(job.status, JobStatus::Paused | JobStatus::Error) || job.processing {
                return false;
            }
            if let Some(failure) = &job.failure
                && failure.kind == FailureKind::Conflict
                && !job.overwrite
            {
                info!(job = %id, "resume refused until the conflict is resolved");
                return false;
            }
        }
        self.start(id)
    }

    /// Accepts replacing incompatible objects at the destination on the next run.
    ///
    /// Each unfinished file is overwritten once; later runs resume it.
    pub fn force_overwrite(&self, id: &str) -> bool {
        let Some(entry) = self.engine.get(id) else {
            return false;
        };
        let mut job = entry.write();
        if job.status == JobStatus::Done {
            return false;
        }
        job.overwrite = true;
        for file in job.files.iter_mut().filter(|f| f.status != FileStatus::Done) {
            file.overwritten = false;
        }
        info!(job = %id, "overwrite forced");
        true
    }

    /// Points an idle job at a new destination; every file is sent again.
    pub fn retarget(&self, id: &str, destination: Destination) -> bool {
        let Some(entry) = self.engine.get(id) else {
            return false;
        };
        let mut job = entry.write();
        if job.processing || !matches!(job.status, JobStatus::Ready | JobStatus::Paused | JobStatus::Error)
        {
            return false;
        }

        info!(
            job = %id,
            root = %destination.root,
            prefix = %destination.prefix,
            "job retargeted"
        );
        job.destination = destination;
        if job
            .failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Conflict)
        {
            job.failure = None;
        }
        for file in &mut job.files {
            file.uploaded = 0;
            file.status = FileStatus::Pending;
            file.error = None;
            file.stored = None;
            file.attempted = false;
            file.overwritten = false;
        }
        true
    }

    /// Aborts any in-flight work and drops the job.
    pub fn remove(&self, id: &str) -> bool {
        let Some(entry) = self.engine.jobs.lock().unwrap().remove(id) else {
            return false;
        };
        {
            let mut job = entry.write();
            job.abort = AbortReason::Remove;
            if let Some(token) = job.run.take() {
                token.cancel();
            }
        }
        info!(job = %id, "job removed");
        self.engine.emit(UploadEvent::Removed {
            job_id: id.to_string(),
        });
        true
    }

    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.engine.get(id).map(|entry| entry.read().snapshot())
    }

    /// Snapshots of every job, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let entries: Vec<Arc<JobEntry>> = self.engine.jobs.lock().unwrap().values().cloned().collect();
        let mut snapshots: Vec<JobSnapshot> = entries.iter().map(|e| e.read().snapshot()).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    /// Waits until the job has no run and is not in an active status.
    pub async fn wait_settled(&self, id: &str) -> Option<JobSnapshot> {
        let entry = self.engine.get(id)?;
        let mut phase = entry.subscribe();
        // A dropped sender means the entry is gone; report its last state anyway.
        let _ = phase.wait_for(|p| p.is_settled()).await;
        let snapshot = entry.read().snapshot();
        Some(snapshot)
    }
}
