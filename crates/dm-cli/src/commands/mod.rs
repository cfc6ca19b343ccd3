//! CLI command implementations

mod apply_update;
mod check;
mod config;
mod dev;
mod status;
mod token;

pub use apply_update::apply_update_command;
pub use check::check_command;
pub use config::{config_get, config_init, config_path, config_set, config_show};
pub use dev::developer_mode;
pub use status::{collect_installations, status_command};
pub use token::{token_info, token_mint, token_redeem, token_revoke, token_verify};
