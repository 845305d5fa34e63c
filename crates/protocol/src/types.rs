use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a status probe is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadIntent {
    /// First attempt: any partial data at the target is discarded on write.
    Replace,
    /// Retry after a partial transfer by this client.
    Resume,
    /// The caller accepted replacing an incompatible object at the target.
    Overwrite,
}

impl UploadIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Resume => "resume",
            Self::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for UploadIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job's files land: a logical root plus a path prefix under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub root: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

impl Destination {
    pub fn new(root: impl Into<String>, prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            root: root.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Joins `relative_path` under the prefix with `/` separators.
    pub fn target_path(&self, relative_path: &str) -> String {
        let rel = relative_path.trim_start_matches('/');
        if self.prefix.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{}", self.prefix, rel)
        }
    }
}

/// Status probe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub root: String,
    pub path: String,
    pub size: u64,
    pub intent: UploadIntent,
}

/// Status probe response: how much of the target the store already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStatus {
    pub offset: u64,
    pub complete: bool,
    /// Size the store has on record (the declared size for new targets).
    #[serde(default)]
    pub size: u64,
    /// SHA-256 of the stored object, only when complete.
    #[serde(default)]
    pub hash: Option<String>,
    /// Whether any object or upload record exists at the target.
    #[serde(default)]
    pub existing: bool,
    /// The stored object, reported once complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<StoredFile>,
}

/// Header of a chunk transfer; the body is `[offset, size)` of the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub root: String,
    pub path: String,
    pub size: u64,
    pub offset: u64,
    #[serde(default)]
    pub overwrite: bool,
}

impl ChunkRequest {
    /// Number of bytes the body is expected to carry.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

/// A completed object as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    /// Path relative to the destination root.
    pub relative_path: String,
    /// Path relative to the store's repository root; used for registration.
    pub path: String,
    pub bytes: u64,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Chunk transfer response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    #[serde(default)]
    pub ok: bool,
    pub complete: bool,
    /// Bytes durably stored after this request.
    pub offset: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<StoredFile>,
}

/// Kind of content library entry.
///
/// `App` is a directory holding a web application project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    File,
    Dir,
    App,
}

/// Registration of a finalized job with the content library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub path: String,
    /// Detected by the library from the registered path when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LibraryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<StoredFile>,
}

/// Library answer to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    #[serde(default)]
    pub ok: bool,
    pub id: String,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
