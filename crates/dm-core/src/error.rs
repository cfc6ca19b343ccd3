//! Core error types for DevManager

use std::path::PathBuf;
use thiserror::Error;

/// Version string errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The string does not match the dotted-numeric grammar
    #[error("Invalid version '{input}': {reason}")]
    Invalid { input: String, reason: String },
}

impl VersionError {
    pub(crate) fn invalid(input: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Handoff token errors
///
/// Each rejection reason is a separate variant so callers can tell a bad
/// token from an expired one from a replay.
#[derive(Error, Debug)]
pub enum TokenError {
    /// No token has been minted (or it was revoked)
    #[error("No token has been issued")]
    Missing,

    /// The presented token does not match the issued one
    #[error("Invalid token")]
    Invalid,

    /// The token is past its expiry time
    #[error("Token has expired")]
    Expired,

    /// The token was already consumed
    #[error("Token has already been used")]
    AlreadyUsed,

    /// The token file could not be read or written
    #[error("Token store error: {0}")]
    Store(#[from] std::io::Error),
}

/// Process control errors
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The executable does not exist or the OS refused to spawn it
    #[error("Failed to launch {path:?}: {reason}")]
    LaunchFailed { path: PathBuf, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
