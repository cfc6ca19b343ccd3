//! dm-update: Release feed client and transactional update engine
//!
//! An [`Updater`] checks a [`ReleaseFeed`] for a newer build, stages the
//! download, and installs it with backup and rollback. Self-updates of the
//! running launcher are finished by a detached helper process.

pub mod error;
pub mod feed;
pub mod first_run;
pub mod helper;
pub mod install;
pub mod observer;
pub mod staging;
pub mod state;
pub mod updater;

pub use error::{FeedError, InstallError, UpdateError};
pub use feed::{GithubFeed, Release, ReleaseAsset, ReleaseFeed};
pub use observer::{ChannelObserver, NullObserver, TracingObserver, UpdateEvent, UpdateObserver};
pub use state::UpdateState;
pub use updater::{AppKind, AppSpec, InstallOutcome, Updater, UpdaterOptions};
