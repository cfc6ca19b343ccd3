//! Handoff token management
//!
//! The launcher mints a short-lived, single-use token before starting the
//! worker and passes the plaintext on the worker's command line. The worker
//! redeems it on startup to unlock its privileged mode.
//!
//! # Storage Model
//!
//! Only a SHA-256 digest of the token is persisted, together with the issue
//! and expiry times and a `used` flag. The file is a single slot: minting a
//! new token overwrites it, which silently invalidates any earlier token
//! that has not been redeemed yet.
//!
//! ```json
//! {
//!   "token_hash": "9f86d08...",
//!   "created_at": "2026-10-18T09:12:44Z",
//!   "expires_at": "2026-10-19T09:12:44Z",
//!   "used": false
//! }
//! ```
//!
//! # Security Model
//!
//! - Token is 32 bytes of cryptographically random data, hex-encoded (64 chars)
//! - Token file has mode 0600 (owner read/write only) on Unix
//! - Digests are compared in constant time
//! - A token validates at most once, and only inside `[created_at, expires_at)`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TokenError;
use crate::fsutil;
use crate::time::{Clock, SystemClock};

/// Length of the token in bytes (before hex encoding)
const TOKEN_BYTES: usize = 32;

/// Token file name
pub const TOKEN_FILENAME: &str = "auth_token.json";

/// Fixed token lifetime
pub const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Persisted token slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Hex SHA-256 of the plaintext token
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

/// Outcome of checking a candidate token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Missing,
    Invalid,
    Expired,
    AlreadyUsed,
}

impl TokenStatus {
    /// Convert a rejection into its error; `Valid` maps to `Ok`
    pub fn into_result(self) -> Result<(), TokenError> {
        match self {
            TokenStatus::Valid => Ok(()),
            TokenStatus::Missing => Err(TokenError::Missing),
            TokenStatus::Invalid => Err(TokenError::Invalid),
            TokenStatus::Expired => Err(TokenError::Expired),
            TokenStatus::AlreadyUsed => Err(TokenError::AlreadyUsed),
        }
    }
}

/// Mints, validates and consumes handoff tokens
///
/// Constructed explicitly and passed to whoever needs it; there is no
/// process-wide instance.
#[derive(Clone)]
pub struct TokenService {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a service backed by the token file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for issue and expiry times
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Path of the token file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mint a new token, overwriting any previous slot
    ///
    /// Returns the plaintext. It is never written to disk.
    pub fn mint(&self) -> Result<String, TokenError> {
        let token = generate_token();
        let now = self.clock.now();
        let record = TokenRecord {
            token_hash: hash_token(&token),
            created_at: now,
            expires_at: now + chrono::Duration::hours(TOKEN_LIFETIME_HOURS),
            used: false,
            used_at: None,
        };

        self.save(&record)?;
        tracing::info!(
            "Minted handoff token (expires in {} hours)",
            TOKEN_LIFETIME_HOURS
        );

        Ok(token)
    }

    /// Check a candidate without changing any state
    pub fn inspect(&self, candidate: &str) -> Result<TokenStatus, TokenError> {
        let Some(record) = self.load()? else {
            return Ok(TokenStatus::Missing);
        };
        Ok(self.status_of(&record, candidate))
    }

    /// Whether `candidate` would currently be accepted
    ///
    /// Fails closed: a missing, unreadable or corrupt slot is `false`.
    pub fn validate(&self, candidate: &str) -> bool {
        match self.inspect(candidate) {
            Ok(TokenStatus::Valid) => true,
            Ok(status) => {
                tracing::warn!("Token rejected: {:?}", status);
                false
            }
            Err(e) => {
                tracing::error!("Token validation error: {}", e);
                false
            }
        }
    }

    /// Validate and, if accepted, mark the token used
    ///
    /// Returns whether this call spent the token.
    pub fn consume(&self, candidate: &str) -> bool {
        match self.redeem(candidate) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Token not consumed: {}", e);
                false
            }
        }
    }

    /// Validate then consume, reporting why a token was refused
    pub fn redeem(&self, candidate: &str) -> Result<(), TokenError> {
        let mut record = self.load()?.ok_or(TokenError::Missing)?;
        self.status_of(&record, candidate).into_result()?;

        record.used = true;
        record.used_at = Some(self.clock.now());
        self.save(&record)?;

        tracing::info!("Handoff token consumed");
        Ok(())
    }

    /// Delete the slot; succeeds when it is already absent
    pub fn revoke(&self) -> bool {
        match fsutil::remove_file_if_exists(&self.path) {
            Ok(()) => {
                tracing::debug!("Revoked handoff token");
                true
            }
            Err(e) => {
                tracing::error!("Failed to revoke token {:?}: {}", self.path, e);
                false
            }
        }
    }

    /// The persisted record, if any (never contains the plaintext)
    pub fn info(&self) -> Result<Option<TokenRecord>, TokenError> {
        self.load()
    }

    fn status_of(&self, record: &TokenRecord, candidate: &str) -> TokenStatus {
        if !constant_time_eq(&hash_token(candidate.trim()), &record.token_hash) {
            return TokenStatus::Invalid;
        }

        let now = self.clock.now();
        if now < record.created_at || now >= record.expires_at {
            return TokenStatus::Expired;
        }

        if record.used {
            return TokenStatus::AlreadyUsed;
        }

        TokenStatus::Valid
    }

    /// Read the token slot
    ///
    /// Returns `Ok(None)` if the file doesn't exist. A corrupt file is also
    /// treated as absent so that it gets overwritten by the next mint.
    fn load(&self) -> Result<Option<TokenRecord>, TokenError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<TokenRecord>(&contents) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    tracing::warn!("Token file {:?} is not valid: {}", self.path, e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &TokenRecord) -> Result<(), TokenError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fsutil::write_atomic(&self.path, json.as_bytes())?;
        fsutil::restrict_permissions(&self.path)?;
        Ok(())
    }
}

/// Generate a new random token
///
/// Returns a 64-character hex string (32 random bytes)
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way digest stored in place of the token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time string comparison
fn constant_time_eq(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }

    let mut result = 0u8;
    for (a, b) in provided.bytes().zip(expected.bytes()) {
        result |= a ^ b;
    }
    result == 0
}
