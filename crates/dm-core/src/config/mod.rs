//! Configuration management for DevManager
//!
//! A single TOML file holds every section. Missing fields fall back to
//! their defaults, so an empty or absent file is a valid configuration.

mod sections;
pub mod serde_utils;

pub use sections::{
    FeedConfig, LauncherConfig, TokenConfig, UpdateConfig, WorkerConfig, FEED_TOKEN_ENV,
};

use crate::error::ConfigError;
use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application name used for platform directories
pub const APP_DIR_NAME: &str = "devmanager";

/// Launcher application name (also its executable stem)
pub const LAUNCHER_NAME: &str = "DevManager";

/// Worker application name (also its executable stem)
pub const WORKER_NAME: &str = "DevAutomator";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Root directory for installed applications
pub fn default_install_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    fsutil::write_atomic(path, content.as_bytes())
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// The whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub feed: FeedConfig,
    pub launcher: LauncherConfig,
    pub worker: WorkerConfig,
    pub update: UpdateConfig,
    pub token: TokenConfig,
}

impl ConfigFile {
    /// Load `path`, or the default location when `None`
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        match load_config(&path) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => {
                tracing::debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Reject values that cannot work at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, repo) in [
            (&self.launcher.name, &self.launcher.repo),
            (&self.worker.name, &self.worker.repo),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("application name is empty".into()));
            }
            if repo.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{}: release repository is empty",
                    name
                )));
            }
        }
        if self.launcher.install_dir == self.worker.install_dir {
            return Err(ConfigError::Invalid(
                "launcher and worker must use different install directories".into(),
            ));
        }
        if self.update.max_attempts == 0 {
            return Err(ConfigError::Invalid("update.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
