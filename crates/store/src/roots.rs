//! Destination roots.
//!
//! A root key (`uploads`, `docRoot`, ...) names a base directory that
//! uploads land under, together with the directory holding the per-target
//! upload records and whether writes are allowed at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ferry_protocol::constants::ROOT_UPLOADS;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Name of the upload-record directory kept inside a root by default.
pub const META_DIR_NAME: &str = ".upload-meta";

/// A resolved destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTarget {
    pub key: String,
    pub label: String,
    pub base: PathBuf,
    pub meta_base: PathBuf,
    pub writable: bool,
}

/// Maps a logical root key to a base path.
pub trait RootResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Result<RootTarget, StoreError>;
}

/// Configuration of one root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootConfig {
    pub key: String,
    #[serde(default)]
    pub label: String,
    /// Base directory; relative paths are resolved against the repository root.
    pub path: PathBuf,
    /// Where upload records live; defaults to `<path>/.upload-meta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

impl RootConfig {
    /// The general uploads area under `files/uploads`.
    pub fn uploads() -> Self {
        Self {
            key: ROOT_UPLOADS.into(),
            label: "Uploads".into(),
            path: PathBuf::from("files").join("uploads"),
            meta_dir: None,
            writable: true,
        }
    }
}

/// Resolver over a fixed set of configured roots.
#[derive(Debug, Clone, Default)]
pub struct StaticRoots {
    roots: HashMap<String, RootTarget>,
}

impl StaticRoots {
    pub fn new(repo_root: &Path, configs: impl IntoIterator<Item = RootConfig>) -> Self {
        let roots = configs
            .into_iter()
            .map(|cfg| {
                let base = repo_root.join(&cfg.path);
                let meta_base = match cfg.meta_dir {
                    Some(dir) => repo_root.join(dir),
                    None => base.join(META_DIR_NAME),
                };
                let label = if cfg.label.is_empty() {
                    cfg.key.clone()
                } else {
                    cfg.label
                };
                let target = RootTarget {
                    key: cfg.key.clone(),
                    label,
                    base,
                    meta_base,
                    writable: cfg.writable,
                };
                (cfg.key, target)
            })
            .collect();
        Self { roots }
    }

    /// Only the `uploads` root.
    pub fn with_defaults(repo_root: &Path) -> Self {
        Self::new(repo_root, [RootConfig::uploads()])
    }
}

impl RootResolver for StaticRoots {
    fn resolve(&self, key: &str) -> Result<RootTarget, StoreError> {
        self.roots
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRoot(key.to_string()))
    }
}
