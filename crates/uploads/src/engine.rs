//! State shared by the scheduler and every job run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{JobFailure, UploadError};
use crate::events::UploadEvent;
use crate::job::{Job, JobStatus};
use crate::remote::{LibraryRegistrar, RemoteStore};

/// Status plus run flag, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Phase {
    pub status: JobStatus,
    pub processing: bool,
}

impl Phase {
    pub fn is_settled(&self) -> bool {
        !self.processing && !self.status.is_active()
    }
}

/// One registry slot: the job behind its own lock, and a phase watch.
pub(crate) struct JobEntry {
    job: RwLock<Job>,
    phase: watch::Sender<Phase>,
}

impl JobEntry {
    pub fn new(job: Job) -> Self {
        let (phase, _) = watch::channel(Phase {
            status: job.status,
            processing: job.processing,
        });
        Self {
            job: RwLock::new(job),
            phase,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Job> {
        self.job.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Job> {
        self.job.write().unwrap()
    }

    /// Publishes the job's current phase. Never blocks on readers of the job.
    pub fn publish(&self, job: &Job) {
        self.phase.send_replace(Phase {
            status: job.status,
            processing: job.processing,
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }
}

pub(crate) struct Engine {
    pub remote: Arc<dyn RemoteStore>,
    pub registrar: Arc<dyn LibraryRegistrar>,
    pub config: EngineConfig,
    pub permits: Arc<Semaphore>,
    pub events: mpsc::Sender<UploadEvent>,
    pub jobs: Mutex<HashMap<String, Arc<JobEntry>>>,
}

impl Engine {
    pub fn get(&self, id: &str) -> Option<Arc<JobEntry>> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub fn emit(&self, event: UploadEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            debug!(job = %event.job_id(), "event channel full, dropping event");
        }
    }

    /// Applies a checked transition, then publishes and reports it.
    pub fn transition(
        &self,
        entry: &JobEntry,
        job: &mut Job,
        next: JobStatus,
    ) -> Result<(), UploadError> {
        if job.status == next {
            return Ok(());
        }
        job.set_status(next)?;
        entry.publish(job);
        self.emit(UploadEvent::StatusChanged {
            job_id: job.id.clone(),
            status: next,
        });
        Ok(())
    }

    /// Ends the current run in `error`.
    pub fn fail(&self, entry: &JobEntry, job: &mut Job, err: &UploadError) {
        let failure = JobFailure::from(err);
        warn!(job = %job.id, kind = %failure.kind, error = %failure.message, "job failed");
        job.fail(failure.clone());
        job.processing = false;
        job.inflight = false;
        job.run = None;
        entry.publish(job);
        self.emit(UploadEvent::StatusChanged {
            job_id: job.id.clone(),
            status: job.status,
        });
        self.emit(UploadEvent::Failed {
            job_id: job.id.clone(),
            kind: failure.kind,
            message: failure.message,
        });
    }

    /// Ends the current run in `paused`.
    pub fn settle_paused(&self, entry: &JobEntry, job: &mut Job) {
        job.processing = false;
        job.inflight = false;
        job.run = None;
        if let Err(e) = self.transition(entry, job, JobStatus::Paused) {
            debug!(job = %job.id, error = %e, "run ended without pausing");
        }
        entry.publish(job);
    }

    /// Drops a finished job once nobody restarted it.
    pub fn remove_if_done(&self, id: &str) {
        let removed = {
            let mut jobs = self.jobs.lock().unwrap();
            let done = jobs
                .get(id)
                .is_some_and(|entry| entry.read().status == JobStatus::Done);
            done && jobs.remove(id).is_some()
        };
        if removed {
            debug!(job = %id, "finished job dropped from registry");
            self.emit(UploadEvent::Removed {
                job_id: id.to_string(),
            });
        }
    }
}
