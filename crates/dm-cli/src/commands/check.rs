//! Check command implementation

use std::sync::Arc;

use dm_core::config::ConfigFile;
use dm_update::{AppSpec, NullObserver, ReleaseFeed, UpdateState, Updater, UpdaterOptions};

use crate::output::{print_info, print_success, print_warning};

/// Report update availability for both applications; installs nothing
///
/// Returns how many applications have an update.
pub async fn check_command(config: &ConfigFile, feed: Arc<dyn ReleaseFeed>) -> usize {
    let options = UpdaterOptions::from_config(config);
    let mut available = 0;

    for app in [AppSpec::launcher(config), AppSpec::worker(config)] {
        let name = app.name.clone();
        let mut updater = Updater::new(app, Arc::clone(&feed), options.clone())
            .with_observer(Arc::new(NullObserver));
        let current = updater
            .current_version()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "not installed".to_string());

        if updater.check_for_update().await {
            available += 1;
            let latest = updater
                .pending_release()
                .map(|r| r.tag.clone())
                .unwrap_or_default();
            print_warning(&format!("{}: {} -> {} available", name, current, latest));
        } else if updater.state() == UpdateState::UpToDate {
            print_success(&format!("{}: {} is up to date", name, current));
        } else {
            print_info(&format!("{}: could not reach the release feed", name));
        }
    }

    available
}
