//! Release feed interface and its GitHub-compatible HTTP client
//!
//! The feed answers two questions: what is the latest release of a
//! repository, and what does a given tag contain. An absent release is a
//! normal answer (`Ok(None)`), not an error.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use dm_core::config::FeedConfig;
use dm_core::error::VersionError;
use dm_core::{Platform, Version};

use crate::error::FeedError;
use crate::observer::UpdateObserver;

/// A downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
    /// Size in bytes reported by the feed; 0 when unknown
    pub size: u64,
    /// Lowercase hex SHA-256, when the feed publishes one
    pub checksum: Option<String>,
}

/// A published release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Parse the tag as a version
    pub fn version(&self) -> Result<Version, VersionError> {
        Version::parse(&self.tag)
    }
}

/// Source of release metadata and payloads
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Latest non-draft release of `repo`
    async fn latest_release(&self, repo: &str) -> Result<Option<Release>, FeedError>;

    /// Release with the given tag
    async fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>, FeedError>;

    /// Stream `asset` into `dest`, reporting progress; returns bytes written
    async fn download(
        &self,
        asset: &ReleaseAsset,
        dest: &Path,
        observer: &dyn UpdateObserver,
    ) -> Result<u64, FeedError>;
}

/// Pick the asset for `app` at `version` on `platform`
///
/// Matching is case-insensitive. Exact `<app>_<version>_<key>.zip` wins,
/// then the `v`-prefixed form, then any `<app>_..._<key>.zip`.
pub fn select_asset<'a>(
    release: &'a Release,
    app: &str,
    version: &Version,
    platform: Platform,
) -> Option<&'a ReleaseAsset> {
    let app = app.to_lowercase();
    let key = platform.key();
    let exact = format!("{}_{}_{}.zip", app, version, key);
    let prefixed = format!("{}_v{}_{}.zip", app, version, key);
    let prefix = format!("{}_", app);
    let suffix = format!("_{}.zip", key);

    let lowered: Vec<(String, &ReleaseAsset)> = release
        .assets
        .iter()
        .map(|a| (a.name.to_lowercase(), a))
        .collect();

    lowered
        .iter()
        .find(|(name, _)| *name == exact)
        .or_else(|| lowered.iter().find(|(name, _)| *name == prefixed))
        .or_else(|| {
            lowered
                .iter()
                .find(|(name, _)| name.starts_with(&prefix) && name.ends_with(&suffix))
        })
        .map(|(_, asset)| *asset)
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    digest: Option<String>,
}

impl From<GithubRelease> for Release {
    fn from(release: GithubRelease) -> Self {
        Release {
            tag: release.tag_name,
            assets: release
                .assets
                .into_iter()
                .map(|a| ReleaseAsset {
                    checksum: a.digest.as_deref().and_then(parse_digest),
                    name: a.name,
                    download_url: a.browser_download_url,
                    size: a.size,
                })
                .collect(),
        }
    }
}

/// Extract the hex part of a `sha256:<hex>` digest
fn parse_digest(digest: &str) -> Option<String> {
    let hex = digest.strip_prefix("sha256:")?;
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_lowercase())
    } else {
        None
    }
}

/// GitHub releases API client
pub struct GithubFeed {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    bearer: Option<String>,
}

impl GithubFeed {
    /// Create a client from feed configuration
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            bearer: config.bearer_token(),
        })
    }

    async fn get_release(&self, url: String) -> Result<Option<Release>, FeedError> {
        tracing::debug!("GET {}", url);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FeedError::Network(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let release: GithubRelease = response.json().await?;
        Ok(Some(release.into()))
    }
}

#[async_trait]
impl ReleaseFeed for GithubFeed {
    async fn latest_release(&self, repo: &str) -> Result<Option<Release>, FeedError> {
        let url = format!("{}/repos/{}/{}/releases/latest", self.api_base, self.owner, repo);
        self.get_release(url).await
    }

    async fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>, FeedError> {
        let url = format!(
            "{}/repos/{}/{}/releases/tags/{}",
            self.api_base, self.owner, repo, tag
        );
        self.get_release(url).await
    }

    async fn download(
        &self,
        asset: &ReleaseAsset,
        dest: &Path,
        observer: &dyn UpdateObserver,
    ) -> Result<u64, FeedError> {
        let mut request = self
            .client
            .get(&asset.download_url)
            .header("Accept", "application/octet-stream");
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await?;
        if !response.status().is_success() {
            return Err(FeedError::Network(format!(
                "Download of {} returned {}",
                asset.name,
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(asset.size);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            observer.on_progress(written, total);
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}
