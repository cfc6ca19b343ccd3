//! Detached helper entry point (`apply-update --plan <file>`)

use std::path::Path;

use anyhow::{Context, Result};

use dm_core::{fsutil, ProcessController};
use dm_update::helper::{self, HelperPlan};
use dm_update::{TracingObserver, UpdateError};

use crate::exit::ExitStatus;

/// Finish a self-update described by the plan at `plan_path`
///
/// Runs without a terminal, so everything is reported through tracing.
pub async fn apply_update_command(plan_path: &Path) -> Result<ExitStatus> {
    let plan = HelperPlan::read(plan_path)
        .with_context(|| format!("Failed to read update plan {:?}", plan_path))?;
    tracing::info!(
        "Applying {} {} to {:?}",
        plan.app_name,
        plan.version,
        plan.install_dir
    );

    let observer = TracingObserver::new(plan.app_name.clone());
    match helper::run_plan(&plan, &observer, &ProcessController::new()).await {
        Ok(exe) => {
            tracing::info!("Self-update complete; {:?} is running", exe);
            // Usually already gone with the staging directory
            if let Err(e) = fsutil::remove_file_if_exists(plan_path) {
                tracing::debug!("Could not remove plan file: {}", e);
            }
            Ok(ExitStatus::Success)
        }
        Err(UpdateError::LaunchFailed(e)) => {
            tracing::error!(
                "{} {} is installed but could not be started: {}",
                plan.app_name,
                plan.version,
                e
            );
            Ok(ExitStatus::Failure)
        }
        Err(e) => {
            tracing::error!("Self-update failed; previous version restored: {}", e);
            Ok(ExitStatus::Failure)
        }
    }
}
