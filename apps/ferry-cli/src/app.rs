//! Wires a scheduler to a backend and drives one upload to a settled state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use ferry_protocol::Destination;
use ferry_store::{Library, LibraryEntry, LocalStore, StaticRoots};
use ferry_transfer::Selection;
use ferry_uploads::{
    EngineConfig, HttpConfig, HttpRemote, JobSnapshot, JobStatus, LibraryRegistrar, RemoteStore,
    UploadEvent, UploadScheduler,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Where uploads go.
#[derive(Debug, Clone)]
pub enum Backend {
    /// A content store reached over HTTP.
    Http(HttpConfig),
    /// A repository directory served in-process.
    Local(PathBuf),
}

/// One `ferry upload` invocation.
#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub paths: Vec<PathBuf>,
    pub destination: Destination,
    pub label: Option<String>,
    pub overwrite: bool,
}

/// Picks the selection shape for the given paths.
pub fn selection_for(paths: &[PathBuf]) -> Selection {
    match paths {
        [single] if single.is_dir() => Selection::Directory(single.clone()),
        many if many.iter().all(|p| p.is_file()) => Selection::Files(many.to_vec()),
        mixed => Selection::Drop(mixed.to_vec()),
    }
}

fn local_library(config: &Config, repo: &Path) -> Library {
    Library::new(repo, repo.join(&config.library_file))
}

fn scheduler_for(config: &Config, backend: &Backend) -> anyhow::Result<UploadScheduler> {
    let engine: EngineConfig = config.engine.clone();
    let (remote, registrar): (Arc<dyn RemoteStore>, Arc<dyn LibraryRegistrar>) = match backend {
        Backend::Http(http) => {
            let client = Arc::new(HttpRemote::new(http.clone())?);
            info!(base_url = %http.base_url, "using remote content store");
            let remote: Arc<dyn RemoteStore> = client.clone();
            let registrar: Arc<dyn LibraryRegistrar> = client;
            (remote, registrar)
        }
        Backend::Local(repo) => {
            std::fs::create_dir_all(repo)
                .with_context(|| format!("cannot create repository {}", repo.display()))?;
            let roots = Arc::new(StaticRoots::new(repo, config.roots.clone()));
            let store: Arc<dyn RemoteStore> = Arc::new(LocalStore::new(repo, roots));
            let library: Arc<dyn LibraryRegistrar> = Arc::new(local_library(config, repo));
            info!(repo = %repo.display(), "using local repository");
            (store, library)
        }
    };
    Ok(UploadScheduler::new(remote, registrar, engine))
}

/// Stages, starts and waits for one upload job.
///
/// Ctrl-C pauses the job; the returned snapshot is its settled state.
pub async fn upload(config: &Config, backend: &Backend, args: UploadArgs) -> anyhow::Result<JobSnapshot> {
    let mut scheduler = scheduler_for(config, backend)?;
    let events = scheduler
        .take_events()
        .context("event receiver already taken")?;
    let printer = tokio::spawn(log_events(events));

    let selection = selection_for(&args.paths);
    let id = scheduler
        .stage(&selection, args.destination, args.label)
        .context("nothing to upload: no readable files in the selection")?;
    if args.overwrite {
        scheduler.force_overwrite(&id);
    }

    if !scheduler.start(&id) {
        let snapshot = scheduler.snapshot(&id).context("job vanished")?;
        printer.abort();
        return Ok(snapshot);
    }

    let snapshot = tokio::select! {
        snapshot = scheduler.wait_settled(&id) => snapshot,
        _ = tokio::signal::ctrl_c() => {
            warn!(job = %id, "interrupted, pausing");
            scheduler.pause(&id);
            scheduler.wait_settled(&id).await
        }
    };
    printer.abort();
    snapshot.context("job vanished")
}

/// Lists the library of a local repository.
pub async fn library(config: &Config, repo: &Path) -> anyhow::Result<Vec<LibraryEntry>> {
    Ok(local_library(config, repo).list().await?)
}

async fn log_events(mut events: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            UploadEvent::Staged { job_id, files, total_bytes } => {
                info!(job = %job_id, files, total_bytes, "staged");
            }
            UploadEvent::StatusChanged { job_id, status } => {
                info!(job = %job_id, status = %status, "status");
            }
            UploadEvent::Progress { job_id, relative_path, progress, .. } => {
                let percent = (progress * 100.0) as u32;
                debug!(job = %job_id, path = %relative_path, percent, "progress");
            }
            UploadEvent::FileDone { job_id, relative_path, skipped } => {
                info!(job = %job_id, path = %relative_path, skipped, "file stored");
            }
            UploadEvent::Completed { job_id, library_id } => {
                info!(job = %job_id, library_id = %library_id, "registered");
            }
            UploadEvent::Failed { job_id, kind, message } => {
                warn!(job = %job_id, kind = %kind, "{message}");
            }
            UploadEvent::Removed { job_id } => {
                debug!(job = %job_id, "removed");
            }
        }
    }
}

/// Process exit status for a settled job.
pub fn exit_ok(snapshot: &JobSnapshot) -> bool {
    snapshot.status == JobStatus::Done
}
