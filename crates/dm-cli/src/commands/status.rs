//! Status command implementation

use dm_core::config::ConfigFile;
use dm_core::{Platform, Version};
use dm_update::install::{backup_dir, installed_version};
use dm_update::AppSpec;

use crate::output::{format_installations, InstallationInfo};

/// Collect installation details for both managed applications
///
/// The launcher falls back to `running_version` when its install
/// directory carries no marker (e.g. when run in place).
pub fn collect_installations(
    config: &ConfigFile,
    platform: Option<Platform>,
    running_version: &Version,
) -> Vec<InstallationInfo> {
    [AppSpec::launcher(config), AppSpec::worker(config)]
        .into_iter()
        .enumerate()
        .map(|(index, app)| {
            let mut version = installed_version(&app.install_dir).map(|v| v.to_string());
            if index == 0 && version.is_none() {
                version = Some(format!("{} (running)", running_version));
            }
            InstallationInfo {
                executable_present: platform
                    .is_some_and(|p| app.executable_path(p).is_file()),
                backup_present: backup_dir(&app.install_dir).is_dir(),
                version,
                install_dir: app.install_dir,
                app: app.name,
            }
        })
        .collect()
}

/// Execute the status command
pub fn status_command(config: &ConfigFile, running_version: &Version) {
    let installations = collect_installations(config, Platform::current(), running_version);
    println!("{}", format_installations(&installations));
}
