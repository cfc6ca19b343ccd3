//! First-run installation of the launcher
//!
//! A launcher started from a download or temporary location copies itself
//! into its install directory and restarts from there. A worker executable
//! shipped next to it is copied into the worker's install directory.

use std::fs;
use std::path::{Path, PathBuf};

use dm_core::{fsutil, Platform, ProcessController, Version};

use crate::error::{InstallError, UpdateError};
use crate::install::VersionMarker;

/// Directory names that mark a transient location
const TRANSIENT_DIR_NAMES: &[&str] = &["downloads", "desktop"];

/// Copies the launcher (and a bundled worker) into place
#[derive(Debug, Clone)]
pub struct FirstRunInstaller {
    launcher_name: String,
    launcher_dir: PathBuf,
    worker_name: String,
    worker_dir: PathBuf,
    platform: Platform,
    temp_dir: PathBuf,
}

impl FirstRunInstaller {
    pub fn new(
        launcher_name: impl Into<String>,
        launcher_dir: impl Into<PathBuf>,
        worker_name: impl Into<String>,
        worker_dir: impl Into<PathBuf>,
        platform: Platform,
    ) -> Self {
        Self {
            launcher_name: launcher_name.into(),
            launcher_dir: launcher_dir.into(),
            worker_name: worker_name.into(),
            worker_dir: worker_dir.into(),
            platform,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Path the launcher is installed at
    pub fn installed_executable(&self) -> PathBuf {
        self.launcher_dir
            .join(self.platform.executable_name(&self.launcher_name))
    }

    /// Whether a launcher running from `current_exe` should install itself
    pub fn needs_installation(&self, current_exe: &Path) -> bool {
        let current_dir = current_exe.parent().map(canonical_or_self);
        if current_dir.as_deref() == Some(canonical_or_self(&self.launcher_dir).as_path()) {
            tracing::debug!("Running from install directory");
            return false;
        }

        if self.is_transient_location(current_exe) {
            tracing::info!("Running from a transient location, installation needed");
            return true;
        }

        if self.installed_executable().is_file() {
            tracing::info!("Already installed, running from a different location");
            return false;
        }

        tracing::info!("No installed copy found, installation needed");
        true
    }

    fn is_transient_location(&self, current_exe: &Path) -> bool {
        let exe = canonical_or_self(current_exe);
        if exe.starts_with(canonical_or_self(&self.temp_dir)) {
            return true;
        }
        exe.parent()
            .into_iter()
            .flat_map(|dir| dir.components())
            .filter_map(|c| c.as_os_str().to_str())
            .any(|name| TRANSIENT_DIR_NAMES.contains(&name.to_lowercase().as_str()))
    }

    /// Copy `current_exe` (and a sibling worker, if any) into place
    ///
    /// Returns the installed launcher path.
    pub fn install(&self, current_exe: &Path, version: &Version) -> Result<PathBuf, InstallError> {
        fs::create_dir_all(&self.launcher_dir)?;
        let target = self.installed_executable();
        copy_executable(current_exe, &target)?;
        VersionMarker::new(version).write(&self.launcher_dir)?;
        tracing::info!("Installed {} to {:?}", self.launcher_name, target);

        let worker_exe = self.platform.executable_name(&self.worker_name);
        if let Some(source) = current_exe.parent().map(|dir| dir.join(&worker_exe)) {
            if source.is_file() {
                fs::create_dir_all(&self.worker_dir)?;
                match copy_executable(&source, &self.worker_dir.join(&worker_exe)) {
                    Ok(()) => tracing::info!("Copied bundled {} executable", self.worker_name),
                    Err(e) => tracing::warn!("Failed to copy bundled {}: {}", self.worker_name, e),
                }
            } else {
                tracing::debug!("No bundled {}; it will be downloaded", self.worker_name);
            }
        }

        Ok(target)
    }

    /// Start the installed launcher with `args`
    pub fn relaunch(
        &self,
        processes: &ProcessController,
        args: &[String],
    ) -> Result<u32, UpdateError> {
        let exe = self.installed_executable();
        let pid = processes.start(&exe, args, &self.launcher_dir)?;
        Ok(pid)
    }
}

fn copy_executable(source: &Path, target: &Path) -> std::io::Result<()> {
    let bytes = fs::read(source)?;
    fsutil::write_atomic(target, &bytes)?;
    fsutil::make_executable(target)
}

fn canonical_or_self(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
