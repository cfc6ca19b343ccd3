//! Configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::{default_config_dir, default_install_root, LAUNCHER_NAME, WORKER_NAME};
use crate::token::TOKEN_FILENAME;

/// Environment variable holding an optional bearer token for the feed
pub const FEED_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Release feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the GitHub-compatible releases API
    pub api_base: String,

    /// Account that owns the release repositories
    pub owner: String,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            owner: "cyberionsoft".to_string(),
            user_agent: format!("{}/{}", LAUNCHER_NAME, env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FeedConfig {
    /// Bearer token from the environment, if set and non-empty
    pub fn bearer_token(&self) -> Option<String> {
        std::env::var(FEED_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

/// The launcher (this program)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub name: String,

    /// Release repository name under `feed.owner`
    pub repo: String,

    pub install_dir: PathBuf,

    /// Substring used to find running launcher processes
    pub process_pattern: String,

    /// Copy the launcher into `install_dir` when started from elsewhere
    pub install_on_first_run: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            name: LAUNCHER_NAME.to_string(),
            repo: "css_dev_manager".to_string(),
            install_dir: default_install_root().join(LAUNCHER_NAME),
            process_pattern: LAUNCHER_NAME.to_lowercase(),
            install_on_first_run: true,
        }
    }
}

/// The companion worker application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,

    /// Release repository name under `feed.owner`
    pub repo: String,

    pub install_dir: PathBuf,

    /// Substring used to find running worker processes
    pub process_pattern: String,

    /// Flag that carries the handoff token on the worker's command line
    pub token_flag: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: WORKER_NAME.to_string(),
            repo: "css_dev_automator".to_string(),
            install_dir: default_install_root().join(WORKER_NAME),
            process_pattern: WORKER_NAME.to_lowercase(),
            token_flag: "--token".to_string(),
        }
    }
}

/// Update timing and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Bound on a release lookup
    #[serde(with = "duration_secs")]
    pub check_timeout: Duration,

    /// Bound on a single asset download
    #[serde(with = "duration_secs")]
    pub download_timeout: Duration,

    /// Graceful stop window before the worker is force-killed
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,

    /// How long the self-update helper waits for the launcher to exit
    #[serde(with = "duration_secs")]
    pub helper_wait: Duration,

    /// Extra sleep after the launcher is gone, for file handles to close
    #[serde(with = "duration_secs")]
    pub helper_grace: Duration,

    /// Process table poll interval for the helper
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Where downloads are staged; a temp directory when unset
    pub staging_dir: Option<PathBuf>,

    /// Attempts for a worker update that fails on the network
    pub max_attempts: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(10),
            helper_wait: Duration::from_secs(30),
            helper_grace: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            staging_dir: None,
            max_attempts: 3,
        }
    }
}

impl UpdateConfig {
    /// Effective staging root
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("devmanager-updates"))
    }
}

/// Handoff token storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token file; defaults to the config directory
    pub path: Option<PathBuf>,
}

impl TokenConfig {
    /// Effective token file path
    pub fn token_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_config_dir().join(TOKEN_FILENAME))
    }
}
