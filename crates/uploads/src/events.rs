use crate::error::FailureKind;
use crate::job::JobStatus;

/// Event emitted by the scheduler while jobs run.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// A selection was staged into a new job.
    Staged {
        job_id: String,
        files: usize,
        total_bytes: u64,
    },
    /// The job moved to a new lifecycle status.
    StatusChanged { job_id: String, status: JobStatus },
    /// Bytes of one file were handed to the remote.
    Progress {
        job_id: String,
        relative_path: String,
        uploaded_bytes: u64,
        total_bytes: u64,
        progress: f64,
    },
    /// One file is stored remotely.
    FileDone {
        job_id: String,
        relative_path: String,
        skipped: bool,
    },
    /// The job was registered with the library.
    Completed { job_id: String, library_id: String },
    /// The job stopped in `error`.
    Failed {
        job_id: String,
        kind: FailureKind,
        message: String,
    },
    /// The job left the registry.
    Removed { job_id: String },
}

impl UploadEvent {
    pub fn job_id(&self) -> &str {
        match self {
            UploadEvent::Staged { job_id, .. }
            | UploadEvent::StatusChanged { job_id, .. }
            | UploadEvent::Progress { job_id, .. }
            | UploadEvent::FileDone { job_id, .. }
            | UploadEvent::Completed { job_id, .. }
            | UploadEvent::Failed { job_id, .. }
            | UploadEvent::Removed { job_id } => job_id,
        }
    }
}
