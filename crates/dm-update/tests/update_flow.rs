//! Update flow integration tests
//!
//! Drives the worker updater end to end against an in-memory release feed
//! and real zip archives in temporary directories.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use dm_core::{Platform, ProcessController, Version};
use dm_update::helper::{HelperPlan, PLAN_FILENAME};
use dm_update::install::{backup_dir, installed_version, VersionMarker};
use dm_update::staging::sha256_file;
use dm_update::{
    AppKind, AppSpec, ChannelObserver, FeedError, InstallOutcome, Release, ReleaseAsset,
    ReleaseFeed, UpdateError, UpdateEvent, UpdateObserver, UpdateState, Updater, UpdaterOptions,
};

const APP: &str = "DevAutomator";

/// Release feed backed by in-memory payloads
#[derive(Default)]
struct FakeFeed {
    latest: Mutex<Option<Release>>,
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    offline: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl FakeFeed {
    fn publish(&self, tag: &str, assets: Vec<(ReleaseAsset, Vec<u8>)>) {
        let mut payloads = self.payloads.lock().unwrap();
        let mut listed = Vec::new();
        for (asset, bytes) in assets {
            payloads.insert(asset.download_url.clone(), bytes);
            listed.push(asset);
        }
        *self.latest.lock().unwrap() = Some(Release {
            tag: tag.to_string(),
            assets: listed,
        });
    }

    fn go_offline(&self) {
        *self.offline.lock().unwrap() = true;
    }

    fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ReleaseFeed for FakeFeed {
    async fn latest_release(&self, _repo: &str) -> Result<Option<Release>, FeedError> {
        if *self.offline.lock().unwrap() {
            return Err(FeedError::Network("connection refused".into()));
        }
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>, FeedError> {
        let latest = self.latest_release(repo).await?;
        Ok(latest.filter(|r| r.tag == tag))
    }

    async fn download(
        &self,
        asset: &ReleaseAsset,
        dest: &Path,
        observer: &dyn UpdateObserver,
    ) -> Result<u64, FeedError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .payloads
            .lock()
            .unwrap()
            .get(&asset.download_url)
            .cloned()
            .ok_or_else(|| FeedError::Network("404".into()))?;
        std::fs::write(dest, &bytes)?;
        observer.on_progress(bytes.len() as u64, asset.size);
        Ok(bytes.len() as u64)
    }
}

/// Build a zip archive in memory
fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Asset metadata that matches `bytes`
fn asset_for(name: &str, bytes: &[u8]) -> ReleaseAsset {
    ReleaseAsset {
        name: name.to_string(),
        download_url: format!("https://releases.invalid/{}", name),
        size: bytes.len() as u64,
        checksum: None,
    }
}

fn linux_asset(version: &str, bytes: Vec<u8>) -> (ReleaseAsset, Vec<u8>) {
    (asset_for(&format!("{}_{}_linux.zip", APP, version), &bytes), bytes)
}

/// Snapshot every file under `dir`
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    if dir.exists() {
        walk(dir, dir, &mut out);
    }
    out
}

struct Harness {
    _root: TempDir,
    install_dir: PathBuf,
    staging_root: PathBuf,
    feed: Arc<FakeFeed>,
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        Self {
            install_dir: root.path().join("apps").join(APP),
            staging_root: root.path().join("staging"),
            feed: Arc::new(FakeFeed::default()),
            _root: root,
        }
    }

    /// Lay down an existing installation at `version`
    fn install_existing(&self, version: &str) {
        std::fs::create_dir_all(self.install_dir.join("data")).unwrap();
        std::fs::write(self.install_dir.join(APP), b"old worker binary").unwrap();
        std::fs::write(self.install_dir.join("data/settings.json"), b"{\"theme\":\"dark\"}").unwrap();
        VersionMarker::new(&Version::parse(version).unwrap())
            .write(&self.install_dir)
            .unwrap();
    }

    fn options(&self) -> UpdaterOptions {
        UpdaterOptions {
            check_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(1),
            staging_root: self.staging_root.clone(),
            helper_wait: Duration::from_secs(1),
            helper_grace: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
        }
    }

    fn spec(&self, kind: AppKind) -> AppSpec {
        AppSpec {
            name: APP.to_string(),
            repo: "css_dev_automator".to_string(),
            install_dir: self.install_dir.clone(),
            process_pattern: "dm-flow-test-no-such-worker".to_string(),
            kind,
        }
    }

    fn updater(&self) -> Updater {
        Updater::new(self.spec(AppKind::Worker), self.feed.clone(), self.options())
            .with_platform(Some(Platform::Linux))
    }
}

#[tokio::test]
async fn test_check_compares_against_installed_marker() {
    let h = Harness::new();
    h.install_existing("0.1.4");

    for (tag, expected) in [("v0.1.5", true), ("v0.1.4", false), ("v0.1.3", false)] {
        h.feed.publish(tag, vec![]);
        let mut updater = h.updater();
        assert_eq!(updater.check_for_update().await, expected, "tag {}", tag);
        let expected_state = if expected {
            UpdateState::UpdateAvailable
        } else {
            UpdateState::UpToDate
        };
        assert_eq!(updater.state(), expected_state);
    }
}

#[tokio::test]
async fn test_launcher_check_uses_running_version() {
    let h = Harness::new();
    h.feed.publish("v0.1.5", vec![]);

    let mut updater = Updater::new(h.spec(AppKind::Launcher), h.feed.clone(), h.options())
        .with_launcher_version(Version::parse("0.1.4").unwrap());
    assert!(updater.check_for_update().await);

    let mut updater = Updater::new(h.spec(AppKind::Launcher), h.feed.clone(), h.options())
        .with_launcher_version(Version::parse("0.1.5").unwrap());
    assert!(!updater.check_for_update().await);
}

#[tokio::test]
async fn test_missing_worker_counts_as_update_available() {
    let h = Harness::new();
    h.feed.publish("v0.1.0", vec![]);
    let mut updater = h.updater();
    assert!(updater.check_for_update().await);
}

#[tokio::test]
async fn test_network_failure_during_check_is_no_update() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    h.feed.publish("v9.9.9", vec![]);
    h.feed.go_offline();

    let mut updater = h.updater();
    assert!(!updater.check_for_update().await);
    assert_eq!(updater.state(), UpdateState::Idle);
    assert!(updater.pending_release().is_none());
}

#[tokio::test]
async fn test_repeated_checks_have_no_side_effects() {
    let h = Harness::new();
    h.install_existing("0.1.5");
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", zip_bytes(&[(APP, b"x")]))]);
    let before = snapshot(&h.install_dir);

    let mut updater = h.updater();
    for _ in 0..3 {
        assert!(!updater.check_for_update().await);
    }

    assert_eq!(snapshot(&h.install_dir), before);
    assert!(!h.staging_root.exists());
    assert!(!backup_dir(&h.install_dir).exists());
}

#[tokio::test]
async fn test_successful_worker_update() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let archive = zip_bytes(&[(APP, b"new worker binary"), ("lib/helper.dat", b"payload")]);
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", archive)]);

    let (observer, mut events) = ChannelObserver::new();
    let mut updater = h.updater().with_observer(Arc::new(observer));
    assert!(updater.check_for_update().await);

    let outcome = updater.download_and_install().await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed(Version::new(0, 1, 5)));
    assert_eq!(updater.state(), UpdateState::Idle);

    assert_eq!(std::fs::read(h.install_dir.join(APP)).unwrap(), b"new worker binary");
    assert_eq!(std::fs::read(h.install_dir.join("lib/helper.dat")).unwrap(), b"payload");
    // Files the archive does not carry survive the update
    assert!(h.install_dir.join("data/settings.json").exists());
    assert_eq!(installed_version(&h.install_dir), Some(Version::new(0, 1, 5)));

    let backup = backup_dir(&h.install_dir);
    assert_eq!(std::fs::read(backup.join(APP)).unwrap(), b"old worker binary");
    assert_eq!(installed_version(&backup), Some(Version::new(0, 1, 4)));

    // Staging is cleaned up
    assert!(!h.staging_root.join(format!("{}-0.1.5", APP)).exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(h.install_dir.join(APP)).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        if let UpdateEvent::Finished { success, .. } = event {
            finished = Some(success);
        }
    }
    assert_eq!(finished, Some(true));
}

#[tokio::test]
async fn test_fresh_install_without_prior_check() {
    let h = Harness::new();
    h.feed.publish("v1.0.0", vec![linux_asset("1.0.0", zip_bytes(&[(APP, b"v1")]))]);

    let mut updater = h.updater();
    let outcome = updater.download_and_install().await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed(Version::new(1, 0, 0)));
    assert_eq!(std::fs::read(h.install_dir.join(APP)).unwrap(), b"v1");
    assert!(!backup_dir(&h.install_dir).exists());
}

#[tokio::test]
async fn test_unsupported_platform_leaves_install_untouched() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let bytes = zip_bytes(&[("DevAutomator.exe", b"win")]);
    h.feed.publish(
        "v0.1.5",
        vec![(asset_for("DevAutomator_0.1.5_windows.zip", &bytes), bytes)],
    );
    let before = snapshot(&h.install_dir);

    let mut updater = h.updater();
    assert!(updater.check_for_update().await);
    let err = updater.download_and_install().await.unwrap_err();
    assert!(matches!(err, UpdateError::UnsupportedPlatform(ref key) if key == "linux"));

    let mut updater = h.updater().with_platform(None);
    assert!(matches!(
        updater.download_and_install().await,
        Err(UpdateError::UnsupportedPlatform(_))
    ));

    assert_eq!(snapshot(&h.install_dir), before);
    assert!(!backup_dir(&h.install_dir).exists());
    assert_eq!(updater.state(), UpdateState::Idle);
}

#[tokio::test]
async fn test_corrupt_download_leaves_install_byte_identical() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let good = zip_bytes(&[(APP, b"new")]);
    let (mut asset, _) = linux_asset("0.1.5", good.clone());
    // Feed advertises more bytes than it serves
    asset.size += 100;
    h.feed.publish("v0.1.5", vec![(asset, good)]);
    let before = snapshot(&h.install_dir);

    let mut updater = h.updater();
    let err = updater.download_and_install().await.unwrap_err();
    assert!(matches!(err, UpdateError::CorruptDownload(_)));

    assert_eq!(snapshot(&h.install_dir), before);
    assert!(!backup_dir(&h.install_dir).exists());
    assert!(!h.staging_root.join(format!("{}-0.1.5", APP)).exists());
}

#[tokio::test]
async fn test_checksum_mismatch_is_corrupt_download() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let bytes = zip_bytes(&[(APP, b"new")]);
    let (mut asset, _) = linux_asset("0.1.5", bytes.clone());
    asset.checksum = Some("0".repeat(64));
    h.feed.publish("v0.1.5", vec![(asset, bytes)]);
    let before = snapshot(&h.install_dir);

    let mut updater = h.updater();
    assert!(matches!(
        updater.download_and_install().await,
        Err(UpdateError::CorruptDownload(_))
    ));
    assert_eq!(snapshot(&h.install_dir), before);
}

#[tokio::test]
async fn test_matching_checksum_installs() {
    let h = Harness::new();
    let bytes = zip_bytes(&[(APP, b"checked")]);
    let (mut asset, _) = linux_asset("0.2.0", bytes.clone());

    let scratch = TempDir::new().unwrap();
    let payload_path = scratch.path().join("payload.zip");
    std::fs::write(&payload_path, &bytes).unwrap();
    asset.checksum = Some(sha256_file(&payload_path).unwrap());
    h.feed.publish("v0.2.0", vec![(asset, bytes)]);

    let mut updater = h.updater();
    updater.download_and_install().await.unwrap();
    assert_eq!(std::fs::read(h.install_dir.join(APP)).unwrap(), b"checked");
}

#[tokio::test]
async fn test_missing_executable_rolls_back_to_backup() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    // The old executable is carried into the new tree, so remove it from
    // the archive's point of view by shipping it under a different name
    let archive = zip_bytes(&[("README.txt", b"oops, no binary")]);
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", archive)]);
    std::fs::remove_file(h.install_dir.join(APP)).unwrap();
    std::fs::write(h.install_dir.join("launch.cfg"), b"cfg").unwrap();
    let before = snapshot(&h.install_dir);

    let mut updater = h.updater();
    let err = updater.download_and_install().await.unwrap_err();
    assert!(matches!(err, UpdateError::InstallationCorrupt(_)));
    assert_eq!(updater.state(), UpdateState::Idle);

    assert_eq!(snapshot(&h.install_dir), before);
    assert_eq!(installed_version(&h.install_dir), Some(Version::new(0, 1, 4)));
    assert_eq!(snapshot(&backup_dir(&h.install_dir)), before);
}

#[tokio::test]
async fn test_unsafe_archive_is_rejected_and_rolled_back() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let archive = zip_bytes(&[(APP, b"new"), ("../../escaped.txt", b"evil")]);
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", archive)]);
    let before = snapshot(&h.install_dir);

    let mut updater = h.updater();
    let err = updater.download_and_install().await.unwrap_err();
    assert!(matches!(err, UpdateError::InstallationCorrupt(ref msg) if msg.contains("escaped.txt")));

    assert_eq!(snapshot(&h.install_dir), before);
    let parent = h.install_dir.parent().unwrap();
    assert!(!parent.join("escaped.txt").exists());
    assert!(!parent.parent().unwrap().join("escaped.txt").exists());
}

#[tokio::test]
async fn test_no_release_is_reported() {
    let h = Harness::new();
    let mut updater = h.updater();
    assert!(!updater.check_for_update().await);
    assert!(matches!(
        updater.download_and_install().await,
        Err(UpdateError::NoRelease(_))
    ));
}

#[tokio::test]
async fn test_download_timeout_is_network_failure() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", zip_bytes(&[(APP, b"new")]))]);
    h.feed.slow_down(Duration::from_secs(30));
    let before = snapshot(&h.install_dir);

    let mut options = h.options();
    options.download_timeout = Duration::from_millis(100);
    let mut updater = Updater::new(h.spec(AppKind::Worker), h.feed.clone(), options)
        .with_platform(Some(Platform::Linux));

    let err = updater.download_and_install().await.unwrap_err();
    assert!(matches!(err, UpdateError::NetworkFailure(_)));
    assert!(err.is_transient());
    assert_eq!(snapshot(&h.install_dir), before);
}

#[tokio::test]
async fn test_cancellation_abandons_download() {
    let h = Harness::new();
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", zip_bytes(&[(APP, b"new")]))]);
    h.feed.slow_down(Duration::from_secs(30));

    let cancel = CancellationToken::new();
    let mut updater = h.updater().with_cancellation(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = updater.download_and_install().await.unwrap_err();
    assert!(matches!(err, UpdateError::Cancelled));
    assert!(!h.install_dir.exists());
    trigger.await.unwrap();
}

#[tokio::test]
async fn test_launcher_update_hands_off_to_helper() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let before = snapshot(&h.install_dir);
    let archive = zip_bytes(&[(APP, b"new launcher binary")]);
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", archive)]);

    let mut updater = Updater::new(h.spec(AppKind::Launcher), h.feed.clone(), h.options())
        .with_platform(Some(Platform::Linux))
        .with_launcher_version(Version::new(0, 1, 4));
    assert!(updater.check_for_update().await);

    let outcome = updater.download_and_install().await.unwrap();
    assert_eq!(outcome, InstallOutcome::RestartRequired(Version::new(0, 1, 5)));
    assert_eq!(updater.state(), UpdateState::Relaunching);

    let staged = h.staging_root.join(format!("{}-0.1.5", APP));
    let plan = HelperPlan::read(&staged.join(PLAN_FILENAME)).unwrap();
    assert_eq!(plan.parent_pid, std::process::id());
    assert_eq!(plan.install_dir, h.install_dir);
    assert_eq!(plan.staging_dir, staged);
    assert_eq!(plan.version, "0.1.5");
    assert!(plan.relaunch);
    assert!(plan.archive.starts_with(&staged));
    assert!(plan.archive.is_file());

    let helper_copied = std::fs::read_dir(&staged)
        .unwrap()
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().contains("-update-helper"));
    assert!(helper_copied);

    // The live installation is left for the helper
    assert_eq!(snapshot(&h.install_dir), before);
    assert!(!backup_dir(&h.install_dir).exists());
}

#[tokio::test]
async fn test_stale_staging_is_swept_on_check() {
    let h = Harness::new();
    h.install_existing("0.1.5");
    let stale = h.staging_root.join(format!("{}-0.1.3", APP));
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("leftover-update-helper"), b"old helper").unwrap();
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", zip_bytes(&[(APP, b"same")]))]);

    let mut updater = h.updater();
    assert!(!updater.check_for_update().await);
    assert!(!stale.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_update_stops_running_worker() {
    let h = Harness::new();
    h.install_existing("0.1.4");
    let archive = zip_bytes(&[(APP, b"new worker binary")]);
    h.feed.publish("v0.1.5", vec![linux_asset("0.1.5", archive)]);

    let pattern = format!("dm-flow-running-worker-{}", std::process::id());
    let mut worker = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("sleep 30; echo {}", pattern))
        .spawn()
        .unwrap();

    let controller = ProcessController::new();
    for _ in 0..50 {
        if !controller.find_by_name(&pattern).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!controller.find_by_name(&pattern).is_empty());

    let mut spec = h.spec(AppKind::Worker);
    spec.process_pattern = pattern.clone();
    let mut updater = Updater::new(spec, h.feed.clone(), h.options())
        .with_platform(Some(Platform::Linux));
    assert!(updater.check_for_update().await);
    let outcome = updater.download_and_install().await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed(Version::new(0, 1, 5)));

    // Stopped before the files were replaced
    assert!(controller.find_by_name(&pattern).is_empty());
    assert!(!worker.wait().unwrap().success());
    assert_eq!(std::fs::read(h.install_dir.join(APP)).unwrap(), b"new worker binary");
}
