//! Upload error types.

use std::fmt;

use ferry_store::StoreError;
use ferry_transfer::{TransferError, VerifyMismatch};
use serde::{Deserialize, Serialize};

/// Errors produced while running upload jobs.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("source changed since staging: {0}")]
    Verification(#[from] VerifyMismatch),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

impl From<StoreError> for UploadError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => UploadError::Conflict(msg),
            other => UploadError::Store(other),
        }
    }
}

impl UploadError {
    /// Classifies the error for the job failure record.
    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::Conflict(_) => FailureKind::Conflict,
            UploadError::Verification(_) => FailureKind::Verification,
            UploadError::Registration(_) => FailureKind::Registration,
            _ => FailureKind::Transport,
        }
    }
}

/// Failure taxonomy exposed on job snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// A staged source no longer matches its snapshot.
    Verification,
    /// Connection or remote failure during a probe or transfer.
    Transport,
    /// The remote refuses the target as incompatible.
    Conflict,
    /// Every byte is stored but the library registration failed.
    Registration,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Verification => "verification",
            FailureKind::Transport => "transport",
            FailureKind::Conflict => "conflict",
            FailureKind::Registration => "registration",
        };
        f.write_str(s)
    }
}

/// Why a job stopped in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&UploadError> for JobFailure {
    fn from(e: &UploadError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
