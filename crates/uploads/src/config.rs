//! Engine and HTTP client settings.

use std::time::Duration;

use ferry_protocol::constants::{LIBRARY_ENDPOINT, UPLOAD_ENDPOINT};
use serde::{Deserialize, Serialize};

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Jobs allowed to transfer at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Seconds a finished job stays visible before it is dropped.
    #[serde(default = "default_done_grace_secs")]
    pub done_grace_secs: u64,

    /// Consecutive partial acceptances without progress before a job fails.
    #[serde(default = "default_max_stalled_partials")]
    pub max_stalled_partials: u32,

    /// Capacity of the event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_done_grace_secs() -> u64 {
    3
}

fn default_max_stalled_partials() -> u32 {
    3
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            done_grace_secs: default_done_grace_secs(),
            max_stalled_partials: default_max_stalled_partials(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn done_grace(&self) -> Duration {
        Duration::from_secs(self.done_grace_secs)
    }
}

/// Remote content store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL of the content store, e.g. `http://127.0.0.1:3000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,

    #[serde(default = "default_library_endpoint")]
    pub library_endpoint: String,

    /// TCP connect timeout in seconds (0 = none).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".into()
}

fn default_upload_endpoint() -> String {
    UPLOAD_ENDPOINT.into()
}

fn default_library_endpoint() -> String {
    LIBRARY_ENDPOINT.into()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_endpoint: default_upload_endpoint(),
            library_endpoint: default_library_endpoint(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    pub(crate) fn upload_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.upload_endpoint)
    }

    pub(crate) fn library_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.library_endpoint)
    }
}
