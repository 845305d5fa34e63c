//! Job and file state.

use std::fmt;

use ferry_protocol::{Destination, StoredFile};
use ferry_transfer::{SourceFile, SpeedCalculator, StagedEntry, fraction, snapshot};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{JobFailure, UploadError};

/// Per-file transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Checking,
    Uploading,
    Done,
    Paused,
    Error,
}

impl FileStatus {
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        match (self, next) {
            (Pending, Checking) => true,
            (Checking, Uploading | Done | Pending | Paused | Error) => true,
            (Uploading, Done | Pending | Paused | Error) => true,
            (Paused | Error, Pending | Checking) => true,
            _ => false,
        }
    }

    /// Terminal for the current run.
    pub fn is_settled(self) -> bool {
        matches!(self, FileStatus::Done | FileStatus::Paused | FileStatus::Error)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Checking => "checking",
            FileStatus::Uploading => "uploading",
            FileStatus::Done => "done",
            FileStatus::Paused => "paused",
            FileStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ready,
    Queued,
    Checking,
    Uploading,
    Paused,
    Finalizing,
    Error,
    Done,
}

impl JobStatus {
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Ready | Paused | Error, Queued) => true,
            (Ready | Queued | Error, Checking) => true,
            (Queued, Paused | Error) => true,
            (Checking, Uploading | Finalizing | Paused | Error) => true,
            (Uploading, Checking | Finalizing | Paused | Error) => true,
            (Finalizing, Done | Paused | Error) => true,
            (Ready, Error) => true,
            _ => false,
        }
    }

    /// Whether a run for the job may still be active.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Checking | JobStatus::Uploading | JobStatus::Finalizing
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Ready => "ready",
            JobStatus::Queued => "queued",
            JobStatus::Checking => "checking",
            JobStatus::Uploading => "uploading",
            JobStatus::Paused => "paused",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Error => "error",
            JobStatus::Done => "done",
        };
        f.write_str(s)
    }
}

/// One file of a job.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub source: SourceFile,
    /// Bytes the remote holds for this file, `0..=size`.
    pub uploaded: u64,
    pub status: FileStatus,
    pub error: Option<String>,
    /// Remote acknowledgement once `done`.
    pub stored: Option<StoredFile>,
    /// A previous run touched this file, so the next probe resumes.
    pub attempted: bool,
    /// A forced overwrite already reached the remote; later probes resume.
    pub(crate) overwritten: bool,
}

impl FileDescriptor {
    pub fn new(source: SourceFile) -> Self {
        Self {
            source,
            uploaded: 0,
            status: FileStatus::Pending,
            error: None,
            stored: None,
            attempted: false,
            overwritten: false,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.source.relative_path
    }

    pub fn size(&self) -> u64 {
        self.source.size
    }

    pub(crate) fn set_status(&mut self, next: FileStatus) -> Result<(), UploadError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(UploadError::IllegalTransition {
                from: format!("file {}", self.status),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Raises `uploaded`; never lowers it and never passes `size`.
    pub(crate) fn advance(&mut self, uploaded: u64) -> bool {
        let clamped = uploaded.min(self.size());
        if clamped > self.uploaded {
            self.uploaded = clamped;
            true
        } else {
            false
        }
    }

    /// Adopts the offset the remote reports holding; may lower `uploaded`
    /// when bytes read by the transport were not stored.
    pub(crate) fn sync_remote(&mut self, offset: u64) -> bool {
        let offset = offset.min(self.size());
        let changed = offset != self.uploaded;
        self.uploaded = offset;
        changed
    }

    pub(crate) fn mark_done(&mut self, stored: StoredFile) -> Result<(), UploadError> {
        self.set_status(FileStatus::Done)?;
        self.uploaded = self.size();
        self.error = None;
        self.stored = Some(stored);
        Ok(())
    }

    pub(crate) fn mark_error(&mut self, message: String) {
        if self.status != FileStatus::Done {
            self.status = FileStatus::Error;
            self.error = Some(message);
            self.attempted = true;
        }
    }
}

/// Why the current run's token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AbortReason {
    #[default]
    None,
    Pause,
    Remove,
}

/// An upload job: files staged together and registered as one library entry.
pub struct Job {
    pub id: String,
    pub files: Vec<FileDescriptor>,
    pub destination: Destination,
    pub label: Option<String>,
    pub status: JobStatus,
    pub pause_requested: bool,
    pub processing: bool,
    /// Snapshot taken at staging; compared before every (re)start.
    pub staged: Vec<StagedEntry>,
    pub failure: Option<JobFailure>,
    /// The caller accepted replacing incompatible objects at the destination.
    pub overwrite: bool,
    /// Library id once registered.
    pub registration: Option<String>,
    pub created_at: i64,
    pub(crate) speed: SpeedCalculator,
    pub(crate) run: Option<CancellationToken>,
    pub(crate) abort: AbortReason,
    pub(crate) inflight: bool,
}

impl Job {
    pub fn new(
        files: Vec<SourceFile>,
        destination: Destination,
        label: Option<String>,
        created_at: i64,
    ) -> Self {
        let staged = snapshot(&files);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            files: files.into_iter().map(FileDescriptor::new).collect(),
            destination,
            label,
            status: JobStatus::Ready,
            pause_requested: false,
            processing: false,
            staged,
            failure: None,
            overwrite: false,
            registration: None,
            created_at,
            speed: SpeedCalculator::default(),
            run: None,
            abort: AbortReason::None,
            inflight: false,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(FileDescriptor::size).sum()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.uploaded).sum()
    }

    pub fn progress(&self) -> f64 {
        if self.status == JobStatus::Done {
            return 1.0;
        }
        fraction(self.uploaded_bytes(), self.total_bytes())
    }

    pub fn all_done(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Done)
    }

    pub(crate) fn set_status(&mut self, next: JobStatus) -> Result<(), UploadError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(UploadError::IllegalTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self, failure: JobFailure) {
        if self.status != JobStatus::Done {
            self.status = JobStatus::Error;
        }
        self.failure = Some(failure);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            label: self.label.clone(),
            destination: self.destination.clone(),
            total_bytes: self.total_bytes(),
            uploaded_bytes: self.uploaded_bytes(),
            progress: self.progress(),
            bytes_per_second: self.speed.bytes_per_second(),
            eta_secs: self
                .speed
                .eta(self.total_bytes().saturating_sub(self.uploaded_bytes()))
                .map(|eta| eta.as_secs()),
            pause_requested: self.pause_requested,
            processing: self.processing,
            overwrite: self.overwrite,
            failure: self.failure.clone(),
            registration: self.registration.clone(),
            created_at: self.created_at,
            files: self
                .files
                .iter()
                .map(|f| FileSnapshot {
                    relative_path: f.relative_path().to_string(),
                    size: f.size(),
                    uploaded: f.uploaded,
                    status: f.status,
                    error: f.error.clone(),
                    stored_path: f.stored.as_ref().map(|s| s.path.clone()),
                })
                .collect(),
        }
    }
}

/// Read-only copy of one file's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub relative_path: String,
    pub size: u64,
    pub uploaded: u64,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,
}

/// Read-only copy of a job, safe to hand to any reader.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub label: Option<String>,
    pub destination: Destination,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub progress: f64,
    pub bytes_per_second: f64,
    /// Estimated seconds left at the recent transfer speed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    pub pause_requested: bool,
    pub processing: bool,
    pub overwrite: bool,
    pub failure: Option<JobFailure>,
    pub registration: Option<String>,
    pub created_at: i64,
    pub files: Vec<FileSnapshot>,
}

impl JobSnapshot {
    /// Human readable status line.
    pub fn message(&self) -> String {
        match (&self.status, &self.failure) {
            (JobStatus::Error, Some(f)) => format!("{} failure: {}", f.kind, f.message),
            (JobStatus::Done, _) => match &self.registration {
                Some(id) => format!("registered as {id}"),
                None => "done".into(),
            },
            (status, _) => format!("{} ({:.0}%)", status, self.progress * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source(rel: &str, size: u64) -> SourceFile {
        SourceFile {
            relative_path: rel.into(),
            source: PathBuf::from("/tmp").join(rel),
            size,
            modified_ms: 1,
        }
    }

    fn job() -> Job {
        Job::new(
            vec![source("a.txt", 10), source("b.txt", 30)],
            Destination::new("uploads", "docs"),
            None,
            0,
        )
    }

    #[test]
    fn new_job_is_ready_with_snapshot() {
        let job = job();
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.staged.len(), job.files.len());
        assert_eq!(job.total_bytes(), 40);
        assert_eq!(job.progress(), 0.0);
        assert_eq!(job.snapshot().eta_secs, None);
        assert!(uuid::Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn progress_is_recomputed_from_files() {
        let mut job = job();
        job.files[0].advance(10);
        job.files[1].advance(10);
        assert_eq!(job.uploaded_bytes(), 20);
        assert_eq!(job.progress(), 0.5);
    }

    #[test]
    fn advance_is_monotonic_and_clamped() {
        let mut file = FileDescriptor::new(source("a.txt", 10));
        assert!(file.advance(4));
        assert!(!file.advance(3));
        assert_eq!(file.uploaded, 4);
        assert!(file.advance(50));
        assert_eq!(file.uploaded, 10);
    }

    #[test]
    fn sync_remote_follows_stored_offset() {
        let mut file = FileDescriptor::new(source("a.txt", 10));
        file.advance(10);
        assert!(file.sync_remote(4));
        assert_eq!(file.uploaded, 4);
        assert!(!file.sync_remote(4));
        assert!(file.sync_remote(99));
        assert_eq!(file.uploaded, 10);
    }

    #[test]
    fn done_is_terminal() {
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Error));
        assert!(!FileStatus::Done.can_transition_to(FileStatus::Pending));

        let mut job = job();
        job.status = JobStatus::Done;
        let err = job.set_status(JobStatus::Checking).unwrap_err();
        assert!(matches!(err, UploadError::IllegalTransition { .. }));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut job = job();
        job.set_status(JobStatus::Queued).unwrap();
        job.set_status(JobStatus::Checking).unwrap();
        job.set_status(JobStatus::Uploading).unwrap();
        job.set_status(JobStatus::Paused).unwrap();
        assert!(job.set_status(JobStatus::Finalizing).is_err());
        job.set_status(JobStatus::Queued).unwrap();
        job.set_status(JobStatus::Checking).unwrap();
        job.set_status(JobStatus::Finalizing).unwrap();
        job.set_status(JobStatus::Done).unwrap();
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn ready_cannot_finalize() {
        assert!(!JobStatus::Ready.can_transition_to(JobStatus::Finalizing));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Uploading));
        assert!(JobStatus::Error.can_transition_to(JobStatus::Checking));
    }

    #[test]
    fn mark_error_keeps_done_files() {
        let mut file = FileDescriptor::new(source("a.txt", 3));
        file.set_status(FileStatus::Checking).unwrap();
        file.mark_done(StoredFile {
            name: "a.txt".into(),
            relative_path: "a.txt".into(),
            path: "files/uploads/a.txt".into(),
            bytes: 3,
            hash: None,
        })
        .unwrap();
        file.mark_error("late failure".into());
        assert_eq!(file.status, FileStatus::Done);
        assert!(file.error.is_none());
    }

    #[test]
    fn snapshot_message() {
        let mut job = job();
        job.fail(JobFailure {
            kind: crate::error::FailureKind::Conflict,
            message: "conflict: size mismatch".into(),
        });
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Error);
        assert_eq!(snap.message(), "conflict failure: conflict: size mismatch");
        assert_eq!(snap.files.len(), 2);
    }
}
