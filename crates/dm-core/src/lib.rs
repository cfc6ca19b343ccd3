//! dm-core: Core building blocks for DevManager
//!
//! This crate provides version ordering, the handoff token store, process
//! control, platform description and configuration shared by the updater
//! and the command-line launcher.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod platform;
pub mod process;
pub mod time;
pub mod token;
pub mod version;

pub use error::{ConfigError, ProcessError, TokenError, VersionError};
pub use platform::Platform;
pub use process::{ProcessController, ProcessHandle};
pub use time::{Clock, ManualClock, SystemClock};
pub use token::{TokenRecord, TokenService, TokenStatus};
pub use version::Version;
