//! Server side of the upload protocol backed by the local filesystem.

mod library;
mod local;
mod meta;
mod roots;

pub use library::{Library, LibraryEntry};
pub use local::LocalStore;
pub use meta::{UploadMeta, read_meta, remove_meta, write_meta};
pub use roots::{META_DIR_NAME, RootConfig, RootResolver, RootTarget, StaticRoots};

use ferry_transfer::TransferError;

/// Errors produced by the content store and library registry.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown root: {0}")]
    InvalidRoot(String),

    #[error("root is read-only: {0}")]
    RootReadOnly(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
