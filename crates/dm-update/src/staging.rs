//! Download staging
//!
//! Payloads are written to `<root>/<app>-<version>/<asset>.part` and only
//! renamed to their final name after the size and checksum check. Nothing
//! here ever touches an install directory.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use dm_core::{fsutil, Version};

use crate::error::UpdateError;
use crate::feed::{ReleaseAsset, ReleaseFeed};
use crate::observer::UpdateObserver;

/// Directory tree that holds downloads until they are installed
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one application version
    pub fn dir_for(&self, app: &str, version: &Version) -> PathBuf {
        self.root.join(format!("{}-{}", app, version))
    }

    /// Download and verify `asset`, returning the staged file
    ///
    /// On a size or checksum mismatch the partial file is deleted and
    /// `CorruptDownload` is returned.
    pub async fn fetch(
        &self,
        feed: &dyn ReleaseFeed,
        asset: &ReleaseAsset,
        app: &str,
        version: &Version,
        observer: &dyn UpdateObserver,
    ) -> Result<PathBuf, UpdateError> {
        let file_name = Path::new(&asset.name)
            .file_name()
            .filter(|n| *n == asset.name.as_str())
            .ok_or_else(|| {
                UpdateError::CorruptDownload(format!("unusable asset name '{}'", asset.name))
            })?;

        let dir = self.dir_for(app, version);
        fs::create_dir_all(&dir)?;
        let final_path = dir.join(file_name);
        let part_path = fsutil::sibling_with_suffix(&final_path, ".part");
        fsutil::remove_file_if_exists(&part_path)?;

        observer.on_status(&format!("Downloading {}", asset.name));
        let written = match feed.download(asset, &part_path, observer).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fsutil::remove_file_if_exists(&part_path);
                return Err(e.into());
            }
        };

        if let Err(e) = verify_payload(&part_path, written, asset) {
            tracing::error!("Discarding staged download {:?}: {}", part_path, e);
            let _ = fsutil::remove_file_if_exists(&part_path);
            return Err(e);
        }

        fs::rename(&part_path, &final_path)?;
        tracing::info!("Staged {} ({} bytes) at {:?}", asset.name, written, final_path);
        Ok(final_path)
    }

    /// Remove every staged version of `app` left behind by earlier runs
    ///
    /// Returns the number of directories removed. Directories that cannot
    /// be removed yet (a helper still running from one) are skipped.
    pub fn sweep(&self, app: &str) -> usize {
        let prefix = format!("{}-", app);
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!("Cannot list staging root {:?}: {}", self.root, e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) || !entry.path().is_dir() {
                continue;
            }
            match fsutil::remove_dir_if_exists(&entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!("Leaving {:?} for a later run: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} stale staging director(ies) for {}", removed, app);
        }
        removed
    }

    /// Remove the staging directory of one application version
    pub fn discard(&self, app: &str, version: &Version) {
        let dir = self.dir_for(app, version);
        if let Err(e) = fsutil::remove_dir_if_exists(&dir) {
            tracing::warn!("Failed to clean staging directory {:?}: {}", dir, e);
        }
    }
}

fn verify_payload(path: &Path, written: u64, asset: &ReleaseAsset) -> Result<(), UpdateError> {
    let on_disk = fs::metadata(path)?.len();
    if on_disk != written {
        return Err(UpdateError::CorruptDownload(format!(
            "wrote {} bytes but {} are on disk",
            written, on_disk
        )));
    }

    if asset.size > 0 && on_disk != asset.size {
        return Err(UpdateError::CorruptDownload(format!(
            "expected {} bytes, got {}",
            asset.size, on_disk
        )));
    }

    if let Some(expected) = &asset.checksum {
        let actual = sha256_file(path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(UpdateError::CorruptDownload(format!(
                "checksum mismatch: expected {}, got {}",
                expected, actual
            )));
        }
    }

    Ok(())
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
