//! Error types for the update engine

use std::path::PathBuf;
use thiserror::Error;

use dm_core::error::{ProcessError, VersionError};

/// Release feed errors
#[derive(Error, Debug)]
pub enum FeedError {
    /// Transport failure, timeout or non-success HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// The feed answered with something we could not understand
    #[error("Malformed feed response: {0}")]
    Malformed(String),

    /// Local I/O while writing a download
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::Malformed(e.to_string())
        } else {
            FeedError::Network(e.to_string())
        }
    }
}

/// Install transaction errors
#[derive(Error, Debug)]
pub enum InstallError {
    /// The archive could not be opened or read
    #[error("Invalid archive {path:?}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// An entry would be written outside the install directory
    #[error("Refusing unsafe archive entry '{0}'")]
    UnsafeEntry(String),

    /// The expected executable is missing after extraction
    #[error("Expected executable missing: {0:?}")]
    MissingExecutable(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for InstallError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => InstallError::Io(io),
            other => InstallError::Archive {
                path: PathBuf::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Updater errors, one variant per failure class surfaced to the caller
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Feed unreachable, timed out, or the download failed in transit
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// No build exists for this operating system
    #[error("No release asset for platform '{0}'")]
    UnsupportedPlatform(String),

    /// Size or checksum mismatch on the downloaded payload
    #[error("Corrupt download: {0}")]
    CorruptDownload(String),

    /// The extracted installation failed verification
    #[error("Installation corrupt: {0}")]
    InstallationCorrupt(String),

    /// The installed executable could not be started
    #[error("Launch failed: {0}")]
    LaunchFailed(#[from] ProcessError),

    /// A release tag or version marker could not be parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] VersionError),

    /// A running instance survived the forced stop, so its files may be locked
    #[error("{0} is still running and could not be stopped")]
    StillRunning(String),

    /// The operation was cancelled
    #[error("Update cancelled")]
    Cancelled,

    /// The feed has no release for this application
    #[error("No release published for {0}")]
    NoRelease(String),

    /// A state change that the update lifecycle does not allow
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Local I/O error outside the install transaction
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FeedError> for UpdateError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Network(msg) => UpdateError::NetworkFailure(msg),
            FeedError::Malformed(msg) => UpdateError::NetworkFailure(msg),
            FeedError::Io(io) => UpdateError::Io(io),
        }
    }
}

impl From<InstallError> for UpdateError {
    fn from(e: InstallError) -> Self {
        UpdateError::InstallationCorrupt(e.to_string())
    }
}

impl UpdateError {
    /// Whether a retry might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, UpdateError::NetworkFailure(_))
    }
}
