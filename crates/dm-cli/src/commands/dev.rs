//! Developer mode, unlocked by a handoff token

use dm_core::config::ConfigFile;
use dm_core::{TokenService, Version};

use super::status::status_command;
use crate::exit::ExitStatus;
use crate::output::{print_error, print_success};

/// Redeem `token` and show installation details
///
/// Invalid, expired and replayed tokens are reported with distinct
/// messages; each is a failure.
pub fn developer_mode(
    config: &ConfigFile,
    tokens: &TokenService,
    token: &str,
    running_version: &Version,
) -> ExitStatus {
    if let Err(e) = tokens.redeem(token) {
        tracing::warn!("Developer mode refused: {}", e);
        print_error(&e.to_string());
        return ExitStatus::Failure;
    }

    print_success("Developer mode unlocked");
    status_command(config, running_version);
    ExitStatus::Success
}
