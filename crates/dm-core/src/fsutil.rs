//! Filesystem helpers for crash-safe mutations
//!
//! Every persistent mutation (token slot, install tree, backup tree) is
//! staged at a temporary sibling path and moved into place with a rename as
//! the last step, so an interruption leaves either the old or the new state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Append a suffix to the final path component (`/a/b` + `_backup` → `/a/b_backup`)
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write a file atomically
///
/// Writes to `<path>.tmp`, syncs, then renames over `path`. Parent
/// directories are created as needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = sibling_with_suffix(path, ".tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&tmp, fs::Permissions::from_mode(meta.permissions().mode()))?;
        }
    }

    fs::rename(&tmp, path)
}

/// Restrict a file to owner read/write (no-op off Unix)
pub fn restrict_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Mark a file executable (no-op off Unix)
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Recursively copy `src` into `dst`, creating `dst` if needed
///
/// Existing files in `dst` are overwritten. Symlinks are copied as the
/// files they point to.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Remove a directory tree, treating "already gone" as success
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a file, treating "already gone" as success
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Whether a directory exists and has at least one entry
pub fn dir_has_entries(path: &Path) -> io::Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Replace the tree at `dst` with a full copy of `src`
///
/// The copy is built at `<dst>_tmp`. The old tree is moved aside to
/// `<dst>_old` before the copy is renamed into place, so `dst` always holds
/// one complete tree; `<dst>_old` is deleted last.
pub fn replace_dir_with_copy(src: &Path, dst: &Path) -> io::Result<()> {
    let staging = sibling_with_suffix(dst, "_tmp");
    let old = sibling_with_suffix(dst, "_old");
    remove_dir_if_exists(&staging)?;
    remove_dir_if_exists(&old)?;
    copy_dir_recursive(src, &staging)?;

    if dst.exists() {
        fs::rename(dst, &old)?;
    }
    if let Err(e) = fs::rename(&staging, dst) {
        if old.exists() {
            let _ = fs::rename(&old, dst);
        }
        return Err(e);
    }

    if let Err(e) = remove_dir_if_exists(&old) {
        tracing::warn!("Failed to remove {:?}: {}", old, e);
    }
    Ok(())
}
