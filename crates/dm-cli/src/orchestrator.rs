//! Launch sequence
//!
//! ```text
//! first-run install ──► self-update ──► worker update ──► mint token ──► launch worker
//!        │                   │                │                              │
//!        └─ restart          └─ restart       └─ fatal only when no          └─ revoke token
//!           from install        via helper       usable worker remains          on failure
//! ```
//!
//! The updaters never retry on their own. Worker downloads that fail with a
//! network error are retried here, with exponential backoff, up to
//! `update.max_attempts`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use dm_core::config::ConfigFile;
use dm_core::{Platform, ProcessController, TokenService, Version};
use dm_update::first_run::FirstRunInstaller;
use dm_update::{
    AppSpec, InstallOutcome, ReleaseFeed, UpdateError, UpdateObserver, Updater, UpdaterOptions,
};

use crate::backoff::ExponentialBackoff;
use crate::exit::ExitStatus;

/// Ties the updaters, the token service and the process controller together
pub struct Orchestrator {
    config: ConfigFile,
    feed: Arc<dyn ReleaseFeed>,
    tokens: TokenService,
    processes: ProcessController,
    observer: Option<Arc<dyn UpdateObserver>>,
    cancel: CancellationToken,
    platform: Option<Platform>,
    current_exe: Option<PathBuf>,
    launcher_version: Version,
    backoff: ExponentialBackoff,
}

impl Orchestrator {
    pub fn new(config: ConfigFile, feed: Arc<dyn ReleaseFeed>, tokens: TokenService) -> Self {
        let launcher_version = Version::parse(env!("CARGO_PKG_VERSION"))
            .unwrap_or_else(|_| Version::new(0, 0, 0));
        Self {
            config,
            feed,
            tokens,
            processes: ProcessController::new(),
            observer: None,
            cancel: CancellationToken::new(),
            platform: Platform::current(),
            current_exe: std::env::current_exe().ok(),
            launcher_version,
            backoff: ExponentialBackoff::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_launcher_version(mut self, version: Version) -> Self {
        self.launcher_version = version;
        self
    }

    /// Path the running launcher was started from
    pub fn with_current_exe(mut self, exe: Option<PathBuf>) -> Self {
        self.current_exe = exe;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run the whole launch sequence
    pub async fn run(&mut self) -> Result<ExitStatus> {
        if self.install_on_first_run()? {
            return Ok(ExitStatus::RestartRequested);
        }
        if self.cancel.is_cancelled() {
            return Ok(ExitStatus::Interrupted);
        }

        match self.update_launcher().await {
            Ok(true) => return Ok(ExitStatus::RestartRequested),
            Ok(false) => {}
            Err(UpdateError::Cancelled) => return Ok(ExitStatus::Interrupted),
            Err(e) => tracing::warn!("Self-update failed, continuing with current version: {}", e),
        }

        match self.update_worker().await {
            Ok(()) => {}
            Err(UpdateError::Cancelled) => return Ok(ExitStatus::Interrupted),
            Err(e) => {
                if self.worker_executable().is_some_and(|p| p.is_file()) {
                    tracing::warn!(
                        "{} update failed, launching installed version: {}",
                        self.config.worker.name,
                        e
                    );
                } else {
                    return Err(anyhow::Error::new(e).context(format!(
                        "{} is not installed and could not be downloaded",
                        self.config.worker.name
                    )));
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(ExitStatus::Interrupted);
        }
        if !self.worker_executable().is_some_and(|p| p.is_file()) {
            bail!(
                "{} is not installed and no release could be installed",
                self.config.worker.name
            );
        }

        self.launch_worker()?;
        Ok(ExitStatus::Success)
    }

    /// Copy the launcher into place and restart from there, if needed
    ///
    /// Returns true when the installed copy has been started.
    fn install_on_first_run(&self) -> Result<bool> {
        if !self.config.launcher.install_on_first_run {
            return Ok(false);
        }
        let (Some(platform), Some(current_exe)) = (self.platform, self.current_exe.as_ref()) else {
            return Ok(false);
        };

        let installer = FirstRunInstaller::new(
            &self.config.launcher.name,
            &self.config.launcher.install_dir,
            &self.config.worker.name,
            &self.config.worker.install_dir,
            platform,
        );
        if !installer.needs_installation(current_exe) {
            return Ok(false);
        }

        if let Err(e) = installer.install(current_exe, &self.launcher_version) {
            tracing::warn!("First-run installation failed, running in place: {}", e);
            return Ok(false);
        }
        let pid = installer
            .relaunch(&self.processes, &[])
            .context("Failed to start the installed launcher")?;
        tracing::info!("Restarted from install directory (PID {})", pid);
        Ok(true)
    }

    fn updater(&self, app: AppSpec) -> Updater {
        let mut updater = Updater::new(
            app,
            Arc::clone(&self.feed),
            UpdaterOptions::from_config(&self.config),
        )
        .with_platform(self.platform)
        .with_cancellation(self.cancel.clone())
        .with_launcher_version(self.launcher_version.clone());
        if let Some(observer) = &self.observer {
            updater = updater.with_observer(Arc::clone(observer));
        }
        updater
    }

    /// Check and stage a self-update
    ///
    /// Returns true when a helper has taken over and this process must exit.
    async fn update_launcher(&self) -> Result<bool, UpdateError> {
        let mut updater = self.updater(AppSpec::launcher(&self.config));
        if !updater.check_for_update().await {
            return Ok(false);
        }
        match updater.download_and_install().await? {
            InstallOutcome::RestartRequired(version) => {
                tracing::info!("Launcher {} staged; exiting for the helper", version);
                Ok(true)
            }
            InstallOutcome::Installed(_) => Ok(false),
        }
    }

    /// Bring the worker up to date, retrying network failures
    async fn update_worker(&mut self) -> Result<(), UpdateError> {
        let mut updater = self.updater(AppSpec::worker(&self.config));
        if !updater.check_for_update().await {
            return Ok(());
        }

        let max_attempts = self.config.update.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match updater.download_and_install().await {
                Ok(outcome) => {
                    tracing::info!("{} update finished: {:?}", self.config.worker.name, outcome);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        "{} update attempt {}/{} failed: {}; retrying in {:?}",
                        self.config.worker.name,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn worker_executable(&self) -> Option<PathBuf> {
        self.platform
            .map(|platform| AppSpec::worker(&self.config).executable_path(platform))
    }

    /// Mint a token and start the worker with it
    fn launch_worker(&self) -> Result<u32> {
        let Some(exe) = self.worker_executable() else {
            bail!("Unsupported platform: {}", std::env::consts::OS);
        };

        let token = self.tokens.mint().context("Failed to mint handoff token")?;
        let args = vec![self.config.worker.token_flag.clone(), token];

        match self
            .processes
            .start(&exe, &args, &self.config.worker.install_dir)
        {
            Ok(pid) => {
                tracing::info!("Started {} (PID {})", self.config.worker.name, pid);
                Ok(pid)
            }
            Err(e) => {
                self.tokens.revoke();
                Err(anyhow::Error::new(e)
                    .context(format!("Failed to start {}", self.config.worker.name)))
            }
        }
    }
}
