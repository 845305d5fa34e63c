//! Resumable upload job engine.
//!
//! A selection of files or folders is staged into a job, verified against
//! its staging snapshot, transferred file by file to a remote content store
//! (status probe, then one `PUT` of the remaining range), and registered as
//! a single library entry once every file is stored.
//!
//! # Pipeline
//!
//! 1. **Stage**: enumerate the selection and snapshot size + mtime
//! 2. **Verify**: refuse to start when a source changed since staging
//! 3. **Probe**: ask the remote how much of each target it holds
//! 4. **Transfer**: stream the remaining range, reporting progress
//! 5. **Finalize**: register one file or the common directory

mod engine;
mod runner;
mod worker;

pub mod config;
pub mod error;
pub mod events;
pub mod finalize;
pub mod http;
pub mod job;
pub mod remote;
pub mod scheduler;

pub use config::{EngineConfig, HttpConfig};
pub use error::{FailureKind, JobFailure, UploadError};
pub use events::UploadEvent;
pub use finalize::{build_registration, common_ancestor};
pub use http::HttpRemote;
pub use job::{FileDescriptor, FileSnapshot, FileStatus, Job, JobSnapshot, JobStatus};
pub use remote::{ChunkBody, LibraryRegistrar, RemoteStore};
pub use scheduler::UploadScheduler;
