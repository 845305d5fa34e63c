//! Local side of resumable uploads.
//!
//! Turns a user selection into staged source files, re-checks them before a
//! transfer (re)starts, and opens the byte range that still has to be sent.

mod chunked;
mod progress;
mod scanner;
mod staging;
mod types;
mod validation;

pub use chunked::{RangeReader, calculate_file_checksum, checksum_bytes, open_range};
pub use progress::{SpeedCalculator, fraction};
pub use scanner::enumerate;
pub use staging::{VerifyMismatch, snapshot, stat_source, system_time_ms, verify_staged};
pub use types::{Selection, SourceFile, SourceStat, StagedEntry};
pub use validation::sanitize_relative;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("invalid byte range: offset {offset} beyond {end}")]
    InvalidRange { offset: u64, end: u64 },
}
