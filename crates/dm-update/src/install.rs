//! Install transaction: backup, extract, swap, verify, rollback
//!
//! Layout around an install directory `D`:
//!
//! ```text
//! D            live installation
//! D_backup     full copy of D taken before the update (one generation)
//! D_incoming   new tree being assembled; renamed over D when complete
//! D_previous   old tree during the swap, deleted afterwards
//! ```
//!
//! Every step leaves either the old or the new complete tree at `D`.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dm_core::{fsutil, ProcessController, Version};

use crate::error::{InstallError, UpdateError};
use crate::observer::UpdateObserver;
use crate::state::{StateMachine, UpdateState};

/// Marker file recording what is installed
pub const VERSION_MARKER: &str = "installed_version.json";

/// Contents of [`VERSION_MARKER`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

impl VersionMarker {
    pub fn new(version: &Version) -> Self {
        Self {
            version: version.to_string(),
            installed_at: Utc::now(),
        }
    }

    /// Write the marker into `dir`
    pub fn write(&self, dir: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fsutil::write_atomic(&dir.join(VERSION_MARKER), json.as_bytes())
    }

    /// Read the marker from `dir`; `Ok(None)` if there is none
    pub fn read(dir: &Path) -> io::Result<Option<Self>> {
        match fs::read_to_string(dir.join(VERSION_MARKER)) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Version recorded in `install_dir`, if readable
pub fn installed_version(install_dir: &Path) -> Option<Version> {
    match VersionMarker::read(install_dir) {
        Ok(Some(marker)) => match Version::parse(&marker.version) {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!("Ignoring version marker in {:?}: {}", install_dir, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Unreadable version marker in {:?}: {}", install_dir, e);
            None
        }
    }
}

/// Sibling backup directory of an installation
pub fn backup_dir(install_dir: &Path) -> PathBuf {
    fsutil::sibling_with_suffix(install_dir, "_backup")
}

fn incoming_dir(install_dir: &Path) -> PathBuf {
    fsutil::sibling_with_suffix(install_dir, "_incoming")
}

fn previous_dir(install_dir: &Path) -> PathBuf {
    fsutil::sibling_with_suffix(install_dir, "_previous")
}

/// Reject absolute paths and any `..` component
fn checked_entry_path(name: &str) -> Result<PathBuf, InstallError> {
    let normalized = name.replace('\\', "/");
    let mut clean = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(InstallError::UnsafeEntry(name.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(InstallError::UnsafeEntry(name.to_string()));
    }
    Ok(clean)
}

/// Extract a zip archive into `dest`
///
/// Every entry name is checked before anything is written. Returns the
/// number of files extracted.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, InstallError> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| InstallError::Archive {
        path: archive.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        entries.push((checked_entry_path(entry.name())?, entry.is_dir()));
    }

    fs::create_dir_all(dest)?;
    let mut extracted = 0;

    for (i, (relative, is_dir)) in entries.into_iter().enumerate() {
        let target = dest.join(&relative);
        if is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entry = zip.by_index(i)?;
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }

        extracted += 1;
    }

    Ok(extracted)
}

/// One backup/install/verify/rollback cycle against an install directory
#[derive(Debug)]
pub struct InstallTransaction {
    install_dir: PathBuf,
    executable_name: String,
    /// Whether `install_dir` existed before we touched it
    existed: bool,
    backed_up: bool,
    /// Whether the live tree has been replaced
    swapped: bool,
}

impl InstallTransaction {
    pub fn new(install_dir: impl Into<PathBuf>, executable_name: impl Into<String>) -> Self {
        let install_dir = install_dir.into();
        Self {
            existed: install_dir.is_dir(),
            install_dir,
            executable_name: executable_name.into(),
            backed_up: false,
            swapped: false,
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Path of the executable inside the install directory
    pub fn executable_path(&self) -> PathBuf {
        self.install_dir.join(&self.executable_name)
    }

    /// Copy the install directory to its backup sibling, replacing any
    /// previous backup. An empty or missing directory is not backed up.
    pub fn backup(&mut self) -> io::Result<bool> {
        if !fsutil::dir_has_entries(&self.install_dir)? {
            tracing::debug!("Nothing to back up in {:?}", self.install_dir);
            return Ok(false);
        }

        let backup = backup_dir(&self.install_dir);
        fsutil::replace_dir_with_copy(&self.install_dir, &backup)?;
        self.backed_up = true;
        tracing::info!("Backed up {:?} to {:?}", self.install_dir, backup);
        Ok(true)
    }

    /// Build the new tree beside the live one and swap it in
    pub fn install(&mut self, archive: &Path, version: &Version) -> Result<(), InstallError> {
        let incoming = incoming_dir(&self.install_dir);
        fsutil::remove_dir_if_exists(&incoming)?;

        if self.install_dir.is_dir() {
            fsutil::copy_dir_recursive(&self.install_dir, &incoming)?;
        }

        let count = extract_archive(archive, &incoming)?;
        tracing::debug!("Extracted {} file(s) into {:?}", count, incoming);

        let exe = incoming.join(&self.executable_name);
        if exe.is_file() {
            fsutil::make_executable(&exe)?;
        }
        VersionMarker::new(version).write(&incoming)?;

        self.swap_in(&incoming)?;
        self.swapped = true;
        Ok(())
    }

    fn swap_in(&self, incoming: &Path) -> io::Result<()> {
        if let Some(parent) = self.install_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        let previous = previous_dir(&self.install_dir);
        fsutil::remove_dir_if_exists(&previous)?;

        if self.install_dir.exists() {
            fs::rename(&self.install_dir, &previous)?;
        }
        if let Err(e) = fs::rename(incoming, &self.install_dir) {
            // Put the old tree back before reporting
            if previous.exists() {
                let _ = fs::rename(&previous, &self.install_dir);
            }
            return Err(e);
        }

        if let Err(e) = fsutil::remove_dir_if_exists(&previous) {
            tracing::warn!("Failed to remove {:?}: {}", previous, e);
        }
        Ok(())
    }

    /// Confirm the expected executable exists
    pub fn verify(&self) -> Result<PathBuf, InstallError> {
        let exe = self.executable_path();
        if exe.is_file() {
            Ok(exe)
        } else {
            Err(InstallError::MissingExecutable(exe))
        }
    }

    /// Restore the pre-update state
    ///
    /// Until the swap has happened the live tree is still the old one, so
    /// only the half-built incoming tree is removed.
    pub fn rollback(&self) -> io::Result<()> {
        fsutil::remove_dir_if_exists(&incoming_dir(&self.install_dir))?;

        if !self.swapped {
            tracing::info!("{:?} was not replaced; nothing to restore", self.install_dir);
            return Ok(());
        }

        if self.backed_up {
            fsutil::replace_dir_with_copy(&backup_dir(&self.install_dir), &self.install_dir)?;
        } else {
            fsutil::remove_dir_if_exists(&self.install_dir)?;
            if self.existed {
                fs::create_dir_all(&self.install_dir)?;
            }
        }

        tracing::info!("Rolled back {:?}", self.install_dir);
        Ok(())
    }
}

/// A staged archive ready to be installed
#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
    pub install_dir: &'a Path,
    pub archive: &'a Path,
    pub executable_name: &'a str,
    pub version: &'a Version,
    /// Start the new executable with these arguments once verified
    pub relaunch: Option<&'a [String]>,
}

/// Run a full install transaction, driving `machine` through its states
///
/// Any failure after the backup triggers a best-effort rollback; the
/// original error is what gets returned. A relaunch failure is reported
/// but does not undo a verified install.
pub fn apply(
    request: &InstallRequest<'_>,
    machine: &mut StateMachine,
    observer: &dyn UpdateObserver,
    processes: &ProcessController,
) -> Result<PathBuf, UpdateError> {
    let mut tx = InstallTransaction::new(request.install_dir, request.executable_name);

    machine.transition(UpdateState::BackingUp)?;
    observer.on_status("Backing up current installation");
    if let Err(e) = tx.backup() {
        machine.reset();
        return Err(e.into());
    }

    machine.transition(UpdateState::Installing)?;
    observer.on_status(&format!("Installing version {}", request.version));
    let installed = tx
        .install(request.archive, request.version)
        .map_err(UpdateError::from)
        .and_then(|()| {
            machine.transition(UpdateState::Verifying)?;
            observer.on_status("Verifying installation");
            tx.verify().map_err(UpdateError::from)
        });

    let exe = match installed {
        Ok(exe) => exe,
        Err(e) => {
            tracing::error!("Install into {:?} failed: {}", request.install_dir, e);
            machine.transition(UpdateState::RollingBack)?;
            observer.on_status("Restoring previous installation");
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!("Rollback of {:?} failed: {}", request.install_dir, rollback_err);
            }
            machine.reset();
            return Err(e);
        }
    };

    if let Some(args) = request.relaunch {
        machine.transition(UpdateState::Relaunching)?;
        observer.on_status("Starting new version");
        let started = processes.start(&exe, args, request.install_dir);
        machine.reset();
        started?;
    } else {
        machine.transition(UpdateState::Idle)?;
    }

    Ok(exe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_checked_entry_path() {
        assert_eq!(checked_entry_path("bin/app").unwrap(), PathBuf::from("bin/app"));
        assert_eq!(checked_entry_path("./app").unwrap(), PathBuf::from("app"));
        for bad in ["../evil", "a/../../evil", "/etc/passwd", "", "."] {
            assert!(checked_entry_path(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_extract_rejects_traversal_before_writing() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("good.txt", b"ok"), ("../escape.txt", b"bad")]);

        let dest = dir.path().join("out");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert!(matches!(err, InstallError::UnsafeEntry(_)));
        assert!(!dest.join("good.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_extract_nested_files() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("ok.zip");
        write_zip(&archive, &[("app", b"exe"), ("lib/data.bin", b"data")]);

        let dest = dir.path().join("out");
        assert_eq!(extract_archive(&archive, &dest).unwrap(), 2);
        assert_eq!(fs::read(dest.join("lib/data.bin")).unwrap(), b"data");
    }

    #[test]
    fn test_extract_rejects_non_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("junk.zip");
        fs::write(&archive, b"not a zip").unwrap();
        assert!(matches!(
            extract_archive(&archive, &dir.path().join("out")),
            Err(InstallError::Archive { .. })
        ));
    }

    #[test]
    fn test_marker_round_trip() {
        let dir = TempDir::new().unwrap();
        assert!(VersionMarker::read(dir.path()).unwrap().is_none());
        assert!(installed_version(dir.path()).is_none());

        VersionMarker::new(&Version::new(0, 1, 5)).write(dir.path()).unwrap();
        assert_eq!(installed_version(dir.path()), Some(Version::new(0, 1, 5)));
    }

    #[test]
    fn test_transaction_install_keeps_untouched_files() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("DevAutomator");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("settings.ini"), b"user").unwrap();
        fs::write(install.join("DevAutomator"), b"old").unwrap();

        let archive = dir.path().join("new.zip");
        write_zip(&archive, &[("DevAutomator", b"new")]);

        let mut tx = InstallTransaction::new(&install, "DevAutomator");
        assert!(tx.backup().unwrap());
        tx.install(&archive, &Version::new(0, 1, 5)).unwrap();
        tx.verify().unwrap();

        assert_eq!(fs::read(install.join("DevAutomator")).unwrap(), b"new");
        assert_eq!(fs::read(install.join("settings.ini")).unwrap(), b"user");
        assert_eq!(fs::read(backup_dir(&install).join("DevAutomator")).unwrap(), b"old");
        assert!(!incoming_dir(&install).exists());
        assert!(!previous_dir(&install).exists());
    }

    #[test]
    fn test_rollback_without_backup_removes_fresh_install() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("Fresh");
        let archive = dir.path().join("new.zip");
        write_zip(&archive, &[("readme.txt", b"no exe here")]);

        let mut tx = InstallTransaction::new(&install, "Fresh");
        assert!(!tx.backup().unwrap());
        tx.install(&archive, &Version::new(1, 0, 0)).unwrap();
        assert!(tx.verify().is_err());
        tx.rollback().unwrap();
        assert!(!install.exists());
    }

    #[test]
    fn test_rollback_before_swap_leaves_live_tree_alone() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("DevAutomator");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("DevAutomator"), b"live").unwrap();
        fs::write(install.join("settings.ini"), b"user").unwrap();

        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", b"bad")]);

        let mut tx = InstallTransaction::new(&install, "DevAutomator");
        assert!(tx.backup().unwrap());
        // Simulate a backup that no longer matches the live tree
        fs::write(backup_dir(&install).join("DevAutomator"), b"stale backup").unwrap();

        assert!(tx.install(&archive, &Version::new(0, 1, 5)).is_err());
        tx.rollback().unwrap();

        assert_eq!(fs::read(install.join("DevAutomator")).unwrap(), b"live");
        assert_eq!(fs::read(install.join("settings.ini")).unwrap(), b"user");
        assert!(!incoming_dir(&install).exists());
    }

    #[test]
    fn test_rollback_after_swap_restores_backup() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("DevAutomator");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("DevAutomator"), b"old").unwrap();

        let archive = dir.path().join("broken.zip");
        write_zip(&archive, &[("readme.txt", b"no exe")]);

        // The executable name the new build is expected to carry
        let mut tx = InstallTransaction::new(&install, "DevAutomatorNext");
        assert!(tx.backup().unwrap());
        tx.install(&archive, &Version::new(0, 1, 5)).unwrap();
        assert!(tx.verify().is_err());
        tx.rollback().unwrap();

        assert_eq!(fs::read(install.join("DevAutomator")).unwrap(), b"old");
        assert!(!install.join("readme.txt").exists());
    }
}
