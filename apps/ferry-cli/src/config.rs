//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ferry/ferry.toml`
//! - Windows: `%APPDATA%/ferry/ferry.toml`

use std::path::{Path, PathBuf};

use ferry_store::RootConfig;
use ferry_uploads::{EngineConfig, HttpConfig};
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Library registry file for `--local` mode, relative to the repository.
    #[serde(default = "default_library_file")]
    pub library_file: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Destination roots served in `--local` mode.
    #[serde(default = "default_roots")]
    pub roots: Vec<RootConfig>,
}

fn default_library_file() -> String {
    "library.json".into()
}

fn default_roots() -> Vec<RootConfig> {
    vec![RootConfig::uploads()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_file: default_library_file(),
            engine: EngineConfig::default(),
            http: HttpConfig::default(),
            roots: default_roots(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform path), creating a
    /// default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config").join("ferry").join("ferry.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("ferry").join("ferry.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/ferry/ferry.toml"))
    }
}
