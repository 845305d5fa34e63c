use std::io::{Read, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// RangeReader
// ---------------------------------------------------------------------------

/// Async reader over the byte range `[offset, end)` of a source file.
pub type RangeReader = tokio::io::Take<tokio::fs::File>;

/// Opens `path` positioned at `offset`, limited to `end - offset` bytes.
///
/// Fails when the file is shorter than `offset`; a file that shrank below
/// `end` simply yields fewer bytes.
pub async fn open_range(path: &Path, offset: u64, end: u64) -> Result<RangeReader, TransferError> {
    if offset > end {
        return Err(TransferError::InvalidRange { offset, end });
    }
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if offset > len {
        return Err(TransferError::InvalidRange { offset, end: len });
    }
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(file.take(end - offset))
}
