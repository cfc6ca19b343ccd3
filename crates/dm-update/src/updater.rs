//! Per-application updater
//!
//! One [`Updater`] exists per managed application. The worker is updated
//! in-process: stop it, then run the install transaction. The launcher
//! cannot replace its own running executable, so its update is staged and
//! handed to a detached helper process (see [`crate::helper`]).

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dm_core::config::ConfigFile;
use dm_core::{Platform, ProcessController, Version};

use crate::error::UpdateError;
use crate::feed::{select_asset, Release, ReleaseFeed};
use crate::helper::{self, HelperPlan};
use crate::install::{self, InstallRequest};
use crate::observer::{TracingObserver, UpdateObserver};
use crate::staging::StagingArea;
use crate::state::{StateMachine, UpdateState};

/// Which side of the handoff an application is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    /// This program; updated through the detached helper
    Launcher,
    /// The companion application; updated in-process
    Worker,
}

/// A managed application
#[derive(Debug, Clone)]
pub struct AppSpec {
    pub name: String,
    pub repo: String,
    pub install_dir: PathBuf,
    pub process_pattern: String,
    pub kind: AppKind,
}

impl AppSpec {
    /// The launcher as configured
    pub fn launcher(config: &ConfigFile) -> Self {
        Self {
            name: config.launcher.name.clone(),
            repo: config.launcher.repo.clone(),
            install_dir: config.launcher.install_dir.clone(),
            process_pattern: config.launcher.process_pattern.clone(),
            kind: AppKind::Launcher,
        }
    }

    /// The worker as configured
    pub fn worker(config: &ConfigFile) -> Self {
        Self {
            name: config.worker.name.clone(),
            repo: config.worker.repo.clone(),
            install_dir: config.worker.install_dir.clone(),
            process_pattern: config.worker.process_pattern.clone(),
            kind: AppKind::Worker,
        }
    }

    /// Executable path inside the install directory
    pub fn executable_path(&self, platform: Platform) -> PathBuf {
        self.install_dir.join(platform.executable_name(&self.name))
    }
}

/// Timeouts and locations used by an updater
#[derive(Debug, Clone)]
pub struct UpdaterOptions {
    pub check_timeout: Duration,
    pub download_timeout: Duration,
    pub stop_timeout: Duration,
    pub staging_root: PathBuf,
    pub helper_wait: Duration,
    pub helper_grace: Duration,
    pub poll_interval: Duration,
}

impl UpdaterOptions {
    pub fn from_config(config: &ConfigFile) -> Self {
        Self {
            check_timeout: config.update.check_timeout,
            download_timeout: config.update.download_timeout,
            stop_timeout: config.update.stop_timeout,
            staging_root: config.update.staging_root(),
            helper_wait: config.update.helper_wait,
            helper_grace: config.update.helper_grace,
            poll_interval: config.update.poll_interval,
        }
    }
}

/// Result of a successful `download_and_install`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The new version is on disk and ready to run
    Installed(Version),
    /// A helper will finish the update once this process exits
    RestartRequired(Version),
}

/// Drives one application through the update lifecycle
pub struct Updater {
    app: AppSpec,
    feed: Arc<dyn ReleaseFeed>,
    observer: Arc<dyn UpdateObserver>,
    options: UpdaterOptions,
    platform: Option<Platform>,
    processes: ProcessController,
    staging: StagingArea,
    machine: StateMachine,
    cancel: CancellationToken,
    launcher_version: Version,
    pending: Option<Release>,
}

impl Updater {
    pub fn new(app: AppSpec, feed: Arc<dyn ReleaseFeed>, options: UpdaterOptions) -> Self {
        let launcher_version = Version::parse(env!("CARGO_PKG_VERSION"))
            .unwrap_or_else(|_| Version::new(0, 0, 0));
        Self {
            observer: Arc::new(TracingObserver::new(app.name.clone())),
            machine: StateMachine::new(app.name.clone()),
            staging: StagingArea::new(options.staging_root.clone()),
            platform: Platform::current(),
            processes: ProcessController::new(),
            cancel: CancellationToken::new(),
            pending: None,
            launcher_version,
            app,
            feed,
            options,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the detected platform (`None` means unsupported)
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Version the launcher reports for itself
    pub fn with_launcher_version(mut self, version: Version) -> Self {
        self.launcher_version = version;
        self
    }

    pub fn app(&self) -> &AppSpec {
        &self.app
    }

    pub fn state(&self) -> UpdateState {
        self.machine.state()
    }

    /// Release found by the last successful check, if newer
    pub fn pending_release(&self) -> Option<&Release> {
        self.pending.as_ref()
    }

    /// Version currently installed
    ///
    /// The launcher reports its compiled-in version; the worker reads the
    /// marker in its install directory (`None` when not installed).
    pub fn current_version(&self) -> Option<Version> {
        match self.app.kind {
            AppKind::Launcher => Some(self.launcher_version.clone()),
            AppKind::Worker => install::installed_version(&self.app.install_dir),
        }
    }

    /// Whether the feed has a strictly newer release
    ///
    /// Never fails: feed errors are logged and reported as `false` so a
    /// network problem does not block the launch.
    pub async fn check_for_update(&mut self) -> bool {
        if !self.machine.state().is_resting() {
            tracing::warn!(
                "[{}] check requested while {}",
                self.app.name,
                self.machine.state()
            );
            return false;
        }
        if self.machine.transition(UpdateState::CheckingForUpdate).is_err() {
            return false;
        }
        self.pending = None;
        self.staging.sweep(&self.app.name);
        self.observer.on_status("Checking for updates");

        let feed = Arc::clone(&self.feed);
        let repo = self.app.repo.clone();
        let lookup = self
            .bounded(self.options.check_timeout, async move {
                feed.latest_release(&repo).await.map_err(UpdateError::from)
            })
            .await;

        let release = match lookup {
            Ok(Some(release)) => release,
            Ok(None) => {
                tracing::info!("[{}] No release published", self.app.name);
                let _ = self.machine.transition(UpdateState::UpToDate);
                return false;
            }
            Err(e) => {
                tracing::error!("[{}] Update check failed: {}", self.app.name, e);
                self.machine.reset();
                return false;
            }
        };

        let latest = match release.version() {
            Ok(version) => version,
            Err(e) => {
                tracing::error!("[{}] Release tag rejected: {}", self.app.name, e);
                self.machine.reset();
                return false;
            }
        };

        let newer = match self.current_version() {
            Some(current) => {
                let newer = dm_core::version::is_newer(&current, &latest);
                if newer {
                    tracing::info!("[{}] Update available: {} -> {}", self.app.name, current, latest);
                } else {
                    tracing::info!("[{}] Up to date ({})", self.app.name, current);
                }
                newer
            }
            None => {
                tracing::info!("[{}] Not installed; {} is available", self.app.name, latest);
                true
            }
        };

        if newer {
            self.pending = Some(release);
            let _ = self.machine.transition(UpdateState::UpdateAvailable);
        } else {
            let _ = self.machine.transition(UpdateState::UpToDate);
        }
        newer
    }

    /// Download and install the pending (or latest) release
    ///
    /// Callers gate this on [`check_for_update`](Self::check_for_update);
    /// no version comparison happens here.
    pub async fn download_and_install(&mut self) -> Result<InstallOutcome, UpdateError> {
        let result = self.run_install().await;
        match &result {
            Ok(InstallOutcome::Installed(v)) => {
                self.observer.on_finished(true, &format!("Installed version {}", v))
            }
            Ok(InstallOutcome::RestartRequired(v)) => self
                .observer
                .on_finished(true, &format!("Version {} will be applied after restart", v)),
            Err(e) => self.observer.on_finished(false, &e.to_string()),
        }
        if result.is_err() && self.machine.state() != UpdateState::Idle {
            self.machine.reset();
        }
        result
    }

    async fn run_install(&mut self) -> Result<InstallOutcome, UpdateError> {
        if !self.machine.state().is_resting() {
            return Err(UpdateError::InvalidTransition {
                from: self.machine.state().to_string(),
                to: UpdateState::Downloading.to_string(),
            });
        }

        let release = match self.pending.take() {
            Some(release) => release,
            None => {
                let feed = Arc::clone(&self.feed);
                let repo = self.app.repo.clone();
                self.bounded(self.options.check_timeout, async move {
                    feed.latest_release(&repo).await.map_err(UpdateError::from)
                })
                .await?
                .ok_or_else(|| UpdateError::NoRelease(self.app.repo.clone()))?
            }
        };

        let version = release.version()?;
        let platform = self
            .platform
            .ok_or_else(|| UpdateError::UnsupportedPlatform(std::env::consts::OS.to_string()))?;
        let asset = select_asset(&release, &self.app.name, &version, platform)
            .cloned()
            .ok_or_else(|| UpdateError::UnsupportedPlatform(platform.key().to_string()))?;

        self.machine.transition(UpdateState::Downloading)?;
        let feed = Arc::clone(&self.feed);
        let observer = Arc::clone(&self.observer);
        let staging = self.staging.clone();
        let app_name = self.app.name.clone();
        let staged_version = version.clone();
        let archive = self
            .bounded(self.options.download_timeout, async move {
                staging
                    .fetch(feed.as_ref(), &asset, &app_name, &staged_version, observer.as_ref())
                    .await
            })
            .await;

        let archive = match archive {
            Ok(path) => path,
            Err(e) => {
                self.staging.discard(&self.app.name, &version);
                return Err(e);
            }
        };

        match self.app.kind {
            AppKind::Worker => self.install_worker(&archive, &version, platform).await,
            AppKind::Launcher => self.hand_off_to_helper(archive, &version, platform),
        }
    }

    async fn install_worker(
        &mut self,
        archive: &std::path::Path,
        version: &Version,
        platform: Platform,
    ) -> Result<InstallOutcome, UpdateError> {
        self.observer.on_status(&format!("Stopping {}", self.app.name));
        let processes = self.processes.clone();
        let pattern = self.app.process_pattern.clone();
        let stop_timeout = self.options.stop_timeout;
        let stopped = tokio::task::spawn_blocking(move || {
            let handles = processes.find_by_name(&pattern);
            processes.stop(&handles, stop_timeout)
        })
        .await
        .unwrap_or(false);
        if !stopped {
            tracing::error!("[{}] Could not stop every running instance", self.app.name);
            self.staging.discard(&self.app.name, version);
            return Err(UpdateError::StillRunning(self.app.name.clone()));
        }

        let executable_name = platform.executable_name(&self.app.name);
        let request = InstallRequest {
            install_dir: &self.app.install_dir,
            archive,
            executable_name: &executable_name,
            version,
            relaunch: None,
        };
        let result = install::apply(
            &request,
            &mut self.machine,
            self.observer.as_ref(),
            &self.processes,
        );
        self.staging.discard(&self.app.name, version);

        result.map(|_| InstallOutcome::Installed(version.clone()))
    }

    fn hand_off_to_helper(
        &mut self,
        archive: PathBuf,
        version: &Version,
        platform: Platform,
    ) -> Result<InstallOutcome, UpdateError> {
        self.observer.on_status("Starting update helper");
        let staging_dir = self.staging.dir_for(&self.app.name, version);
        let plan = HelperPlan {
            archive,
            staging_dir: staging_dir.clone(),
            install_dir: self.app.install_dir.clone(),
            executable_name: platform.executable_name(&self.app.name),
            app_name: self.app.name.clone(),
            version: version.to_string(),
            parent_pid: std::process::id(),
            process_name: self.app.process_pattern.clone(),
            wait: self.options.helper_wait,
            grace: self.options.helper_grace,
            poll_interval: self.options.poll_interval,
            relaunch: true,
            relaunch_args: Vec::new(),
        };

        match helper::spawn_helper(&plan, &staging_dir, &self.processes) {
            Ok(pid) => {
                tracing::info!("[{}] Update helper running as PID {}", self.app.name, pid);
                self.machine.transition(UpdateState::Relaunching)?;
                Ok(InstallOutcome::RestartRequired(version.clone()))
            }
            Err(e) => {
                self.staging.discard(&self.app.name, version);
                Err(e)
            }
        }
    }

    /// Run `fut` under `limit`, abandoning it on timeout or cancellation
    async fn bounded<T, F>(&self, limit: Duration, fut: F) -> Result<T, UpdateError>
    where
        F: Future<Output = Result<T, UpdateError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(UpdateError::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(UpdateError::NetworkFailure(format!(
                    "timed out after {}",
                    dm_core::time::format_duration(limit)
                ))),
            },
        }
    }
}
