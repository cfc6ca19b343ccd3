//! Detached self-update helper
//!
//! The launcher cannot overwrite its own executable while it runs. Instead
//! it writes a [`HelperPlan`], copies itself into the staging directory and
//! starts that copy with `apply-update --plan <file>`. The copy waits for
//! the launcher to exit, installs the staged archive, restarts the new
//! launcher and removes the staged files.
//!
//! On Unix the helper deletes its whole staging directory, its own
//! executable included. Windows keeps a running executable locked, so
//! there the directory is left for [`StagingArea::sweep`] on the next run.
//!
//! [`StagingArea::sweep`]: crate::staging::StagingArea::sweep
//!
//! The wait is bounded: once it runs out the helper proceeds as if the
//! launcher had exited.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use dm_core::config::serde_utils::duration_secs;
use dm_core::{fsutil, process, ProcessController, Version};

use crate::error::UpdateError;
use crate::install::{self, InstallRequest};
use crate::observer::UpdateObserver;
use crate::state::StateMachine;

/// File name of the plan inside the staging directory
pub const PLAN_FILENAME: &str = "update_plan.json";

/// Hidden subcommand the helper is started with
pub const APPLY_UPDATE_COMMAND: &str = "apply-update";

/// Everything the helper needs to finish a self-update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperPlan {
    /// Verified archive to install
    pub archive: PathBuf,
    /// Per-version staging directory holding the archive, plan and helper
    pub staging_dir: PathBuf,
    pub install_dir: PathBuf,
    pub executable_name: String,
    pub app_name: String,
    pub version: String,
    /// PID of the launcher that started the helper
    pub parent_pid: u32,
    /// Name pattern the launcher process is found by
    pub process_name: String,
    /// Upper bound on waiting for the launcher to exit
    #[serde(with = "duration_secs")]
    pub wait: Duration,
    /// Extra delay after the launcher is gone
    #[serde(with = "duration_secs")]
    pub grace: Duration,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Start the new executable after installing
    pub relaunch: bool,
    #[serde(default)]
    pub relaunch_args: Vec<String>,
}

impl HelperPlan {
    pub fn write(&self, path: &Path) -> Result<(), UpdateError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fsutil::write_atomic(path, json.as_bytes())?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, UpdateError> {
        let contents = fs::read_to_string(path)?;
        let plan = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(plan)
    }
}

/// Write the plan, copy the running executable and start the copy
///
/// Returns the helper's PID. The caller should exit promptly afterwards.
pub fn spawn_helper(
    plan: &HelperPlan,
    staging_dir: &Path,
    processes: &ProcessController,
) -> Result<u32, UpdateError> {
    fs::create_dir_all(staging_dir)?;

    let plan_path = staging_dir.join(PLAN_FILENAME);
    plan.write(&plan_path)?;

    let current_exe = std::env::current_exe()?;
    let helper_exe = staging_dir.join(helper_executable_name(&current_exe));
    fs::copy(&current_exe, &helper_exe)?;
    fsutil::make_executable(&helper_exe)?;

    let args = vec![
        APPLY_UPDATE_COMMAND.to_string(),
        "--plan".to_string(),
        plan_path.to_string_lossy().into_owned(),
    ];
    let pid = processes.start(&helper_exe, &args, staging_dir)?;
    Ok(pid)
}

fn helper_executable_name(current_exe: &Path) -> String {
    let stem = current_exe
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "devmanager".to_string());
    match current_exe.extension() {
        Some(ext) => format!("{}-update-helper.{}", stem, ext.to_string_lossy()),
        None => format!("{}-update-helper", stem),
    }
}

/// Wait for the launcher to exit, bounded by `plan.wait`
///
/// Returns true if the exit was observed, false if the wait ran out.
pub async fn wait_for_parent_exit(plan: &HelperPlan, processes: &ProcessController) -> bool {
    let deadline = Instant::now() + plan.wait;
    let poll = plan.poll_interval.max(Duration::from_millis(50));

    loop {
        let controller = processes.clone();
        let pattern = plan.process_name.clone();
        let parent = plan.parent_pid;
        let running = tokio::task::spawn_blocking(move || {
            controller
                .find_by_name(&pattern)
                .iter()
                .any(|handle| handle.pid == parent)
        })
        .await
        .unwrap_or_else(|_| process::is_process_alive(parent));

        if !running {
            tracing::info!("Launcher (PID {}) has exited", plan.parent_pid);
            return true;
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                "Launcher (PID {}) still running after {:?}; proceeding",
                plan.parent_pid,
                plan.wait
            );
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Execute a plan: wait, install, relaunch, clean up
pub async fn run_plan(
    plan: &HelperPlan,
    observer: &dyn UpdateObserver,
    processes: &ProcessController,
) -> Result<PathBuf, UpdateError> {
    observer.on_status(&format!("Waiting for {} to exit", plan.app_name));
    wait_for_parent_exit(plan, processes).await;
    tokio::time::sleep(plan.grace).await;

    let version = Version::parse(&plan.version)?;
    let mut machine = StateMachine::new(plan.app_name.clone());
    let request = InstallRequest {
        install_dir: &plan.install_dir,
        archive: &plan.archive,
        executable_name: &plan.executable_name,
        version: &version,
        relaunch: plan.relaunch.then_some(plan.relaunch_args.as_slice()),
    };

    let result = install::apply(&request, &mut machine, observer, processes);
    // A launch failure comes after a verified install, so the new files stay
    if matches!(result, Ok(_) | Err(UpdateError::LaunchFailed(_))) {
        clean_up_staging(plan);
    }
    let (success, message) = outcome_message(&result, &version);
    observer.on_finished(success, &message);
    result
}

/// Success flag and summary line for a finished plan
pub fn outcome_message(
    result: &Result<PathBuf, UpdateError>,
    version: &Version,
) -> (bool, String) {
    match result {
        Ok(exe) => (true, format!("Updated to {} ({:?})", version, exe)),
        Err(UpdateError::LaunchFailed(e)) => (
            false,
            format!("Installed {} but could not start it: {}", version, e),
        ),
        Err(e) => (
            false,
            format!("Self-update failed, previous version restored: {}", e),
        ),
    }
}

/// Remove what the launcher staged for this plan
fn clean_up_staging(plan: &HelperPlan) {
    if let Err(e) = fsutil::remove_file_if_exists(&plan.archive) {
        tracing::warn!("Failed to remove staged archive {:?}: {}", plan.archive, e);
    }

    #[cfg(unix)]
    if let Err(e) = fsutil::remove_dir_if_exists(&plan.staging_dir) {
        tracing::warn!("Failed to remove staging directory {:?}: {}", plan.staging_dir, e);
    }
}
