//! Self-updater for the kiosk install
//!
//! Features:
//! - Poll the release feed while the launcher runs (or always with `force`)
//! - Skip polls without connectivity or while a student is logged in
//! - Download, reserve the kiosk, stop the tracked processes
//! - Extract over the install with orphan cleanup
//! - Relaunch through the scheduled task, also after a failed install

pub mod download;
pub mod release;

use crate::archive::{cleanup_extracted, extract_zip};
use crate::cache::VersionInfo;
use crate::config::KioskConfig;
use crate::elevation::{run_elevated, Credentials};
use crate::env::{exe_name, KioskEnv, LAUNCHER_STEM};
use crate::error::{KioskError, KioskResult};
use crate::kiosk::idle;
use crate::net;
use crate::process::ProcessControl;
use release::{evaluate, ReleaseAsset, ReleaseFeed, UpdateDecision};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct UpdaterOptions {
    /// Install base; the environment's base dir when absent.
    pub base_dir: Option<PathBuf>,
    /// Direct archive URL instead of the release feed.
    pub direct_url: Option<String>,
    /// Keep polling even when the launcher is not running.
    pub force: bool,
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    UpToDate,
    Applied,
}

/// Machine-level actions of the updater.
pub trait UpdateHost {
    async fn launcher_running(&self) -> bool;
    async fn internet_ok(&self) -> bool;
    async fn kiosk_idle(&self) -> bool;
    /// Installed version from `details.json`.
    async fn local_version(&self) -> Option<String>;
    async fn latest_asset(&self) -> KioskResult<ReleaseAsset>;
    /// Fetch the asset to the install's archive path.
    async fn download(&self, asset: &ReleaseAsset) -> KioskResult<()>;
    /// Ask the kiosk to hold off logins.
    async fn reserve(&self) -> bool;
    /// Kill every tracked process except self.
    async fn stop_apps(&self);
    /// Extract the downloaded archive and clean up orphans.
    async fn install(&self) -> KioskResult<usize>;
    /// Start the launcher again.
    async fn relaunch(&self);
}

/// `UpdateHost` backed by the real install, network and processes.
pub struct SystemHost {
    env: KioskEnv,
    config: KioskConfig,
    feed: ReleaseFeed,
    client: reqwest::Client,
    direct_url: Option<String>,
}

impl SystemHost {
    /// Fails with `UnsafePath` when the base dir or its archive path is unsafe.
    pub fn new(env: KioskEnv, config: KioskConfig, options: &UpdaterOptions) -> KioskResult<Self> {
        let env = match &options.base_dir {
            Some(dir) => env.with_base_dir(dir)?,
            None => env,
        };
        env.safe_path(env.update_archive())?;

        let client = net::http_client();
        let feed = ReleaseFeed::new(client.clone(), config.update.clone());
        Ok(Self {
            env,
            config,
            feed,
            client,
            direct_url: options.direct_url.clone(),
        })
    }

    pub fn env(&self) -> &KioskEnv {
        &self.env
    }

    fn archive(&self) -> KioskResult<PathBuf> {
        self.env.safe_path(self.env.update_archive())
    }

    async fn restart_task(&self) -> KioskResult<()> {
        let creds = Credentials::from_config(&self.config)?;
        let command = format!("schtasks /run /tn \"{}\"", self.config.update.schtask_name);
        run_elevated(&command, &creds, false).await?;
        Ok(())
    }
}

impl UpdateHost for SystemHost {
    async fn launcher_running(&self) -> bool {
        ProcessControl::is_running(&exe_name(LAUNCHER_STEM))
    }

    async fn internet_ok(&self) -> bool {
        net::internet_ok(CONNECTIVITY_TIMEOUT).await
    }

    async fn kiosk_idle(&self) -> bool {
        idle::kiosk_idle(self.config.kiosk.idle_port).await
    }

    async fn local_version(&self) -> Option<String> {
        VersionInfo::load(&self.env.details_file())
            .map_err(|e| debug!("No local details: {}", e))
            .ok()
            .and_then(|d| d.version)
    }

    async fn latest_asset(&self) -> KioskResult<ReleaseAsset> {
        self.feed.latest_asset(self.direct_url.as_deref()).await
    }

    async fn download(&self, asset: &ReleaseAsset) -> KioskResult<()> {
        let archive = self.archive()?;
        download::download(&self.client, &asset.url, &archive, |_| {}).await?;
        Ok(())
    }

    async fn reserve(&self) -> bool {
        idle::request_reservation(self.config.kiosk.idle_port).await
    }

    async fn stop_apps(&self) {
        let names = self.env.all_app_processes(&[]);
        ProcessControl::kill_by_names(&names, true).await;
    }

    async fn install(&self) -> KioskResult<usize> {
        let archive = self.archive()?;
        install_archive(&self.env, &archive, self.env.base_dir(), &self.config.update.keep).await
    }

    async fn relaunch(&self) {
        info!("Restarting Accessly...");
        if let Err(e) = self.restart_task().await {
            error!("Could not restart launcher through the scheduled task: {}", e);
            let launcher = self.env.script_launcher().to_string_lossy().to_string();
            if let Err(e) = ProcessControl::spawn_if_not_running(&[launcher]) {
                error!("Could not restart launcher: {}", e);
            }
        }
    }
}

pub struct Updater<H: UpdateHost> {
    host: H,
    interval: Duration,
    force: bool,
    /// Asset whose install failed after the apps were stopped.
    pending: Option<ReleaseAsset>,
}

impl Updater<SystemHost> {
    /// Fails with `UnsafePath` when the base dir or its archive path is unsafe.
    pub fn new(env: KioskEnv, config: KioskConfig, options: UpdaterOptions) -> KioskResult<Self> {
        let interval = config.update.check_interval();
        let host = SystemHost::new(env, config, &options)?;
        Ok(Self::with_host(host, interval, options.force))
    }
}

impl<H: UpdateHost> Updater<H> {
    pub fn with_host(host: H, interval: Duration, force: bool) -> Self {
        Self {
            host,
            interval,
            force,
            pending: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Poll until an update is applied or the launcher goes away. Only fatal
    /// errors escape; everything else is retried on the next interval. A
    /// failed install is retried even without a launcher.
    pub async fn run(&mut self) -> KioskResult<()> {
        if self.force {
            info!("Force running...");
        }

        loop {
            if !self.force && self.pending.is_none() && !self.host.launcher_running().await {
                info!("Launcher not running, shutting down updater");
                return Ok(());
            }

            if !self.host.internet_ok().await {
                warn!("No internet connection");
                tokio::time::sleep(self.interval).await;
                continue;
            }

            if !self.host.kiosk_idle().await {
                info!("Main is in use, unsafe to update");
                tokio::time::sleep(self.interval).await;
                continue;
            }

            debug!("Safe to update");
            match self.poll_once().await {
                Ok(PollOutcome::Applied) => return Ok(()),
                Ok(PollOutcome::UpToDate) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("Update attempt failed: {}", e),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Compare versions and apply the release when they differ. A pending
    /// install is applied again without a version check.
    pub async fn poll_once(&mut self) -> KioskResult<PollOutcome> {
        let asset = match self.pending.take() {
            Some(asset) => {
                info!("Retrying install of {}", asset.name);
                asset
            }
            None => {
                let local = self.host.local_version().await;
                let asset = self.host.latest_asset().await?;
                let decision = evaluate(local.as_deref(), asset.version.as_deref());
                match &decision {
                    UpdateDecision::UpToDate => {
                        info!("Version {} is already up to date", local.unwrap_or_default())
                    }
                    UpdateDecision::Outdated { local, remote } => {
                        info!("Update available: {} -> {}", local, remote)
                    }
                    UpdateDecision::Invalid => info!("Invalid versions, update required"),
                }
                if !decision.needs_update() {
                    return Ok(PollOutcome::UpToDate);
                }
                asset
            }
        };

        self.apply(asset).await?;
        Ok(PollOutcome::Applied)
    }

    async fn apply(&mut self, asset: ReleaseAsset) -> KioskResult<()> {
        info!("Downloading {}...", asset.version.as_deref().unwrap_or(&asset.name));
        while let Err(e) = self.host.download(&asset).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("Download failed: {}", e);
            tokio::time::sleep(self.interval).await;
        }

        while !self.host.reserve().await {
            info!("Main is in use, unsafe to extract");
            tokio::time::sleep(self.interval).await;
        }

        self.host.stop_apps().await;

        info!("Extracting update...");
        if let Err(e) = self.host.install().await {
            error!("Install of {} failed, bringing the kiosk back", asset.name);
            self.pending = Some(asset);
            self.host.relaunch().await;
            return Err(e);
        }

        self.host.relaunch().await;
        Ok(())
    }
}

/// Extract `archive` over `base` (deleting the archive) and remove files
/// the release no longer ships, except under `keep`.
pub async fn install_archive(
    env: &KioskEnv,
    archive: &Path,
    base: &Path,
    keep: &[String],
) -> KioskResult<usize> {
    let extracted = extract_zip(env, archive, base, true, |percent| {
        debug!("Extracting: {:.2}%", percent)
    })
    .await?;
    if extracted.is_empty() {
        return Err(KioskError::Process("Archive was empty".into()));
    }

    info!("Cleaning up...");
    cleanup_extracted(env, base, &extracted, keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use accessly_devkit::fixtures::{write_tree, write_zip};
    use accessly_devkit::test_utils::Sandbox;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    fn sandbox_env(sandbox: &Sandbox) -> KioskEnv {
        let (users, program_data, windir) = sandbox.roots();
        KioskEnv::with_roots("GVC", users, program_data, windir)
    }

    #[test]
    fn test_unsafe_base_dir_is_fatal() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let options = UpdaterOptions {
            base_dir: Some(env.windir().join("System32")),
            ..Default::default()
        };
        let err = Updater::new(env, KioskConfig::default(), options).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_custom_base_dir() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let base = sandbox.path().join("kiosk");
        let options = UpdaterOptions {
            base_dir: Some(base.clone()),
            ..Default::default()
        };
        let updater = Updater::new(env, KioskConfig::default(), options).unwrap();
        assert_eq!(updater.host().env().update_archive(), base.join("update.zip"));
    }

    #[tokio::test]
    async fn test_install_replaces_release_and_keeps_local_data() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let base = env.base_dir().to_path_buf();
        write_tree(
            &base,
            &[
                ("src/details.json", r#"{"version": "0.4.6"}"#),
                ("src/retired.exe", "old"),
                ("cache/lock_kiosk_status.json", r#"{"ENABLED": true}"#),
                ("data/Students.csv", "1,Doe,John,,BSCS\n"),
            ],
        );
        let archive = env.update_archive();
        write_zip(
            &archive,
            &[
                ("src/details.json", r#"{"version": "0.4.7"}"#),
                ("src/accessly-main.exe", "new"),
            ],
        );

        let removed = install_archive(&env, &archive, &base, &KioskConfig::default().update.keep)
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(!base.join("src").join("retired.exe").exists());
        assert!(base.join("data").join("Students.csv").exists());
        assert!(base.join("cache").join("lock_kiosk_status.json").exists());
        assert!(!archive.exists());
        let details = VersionInfo::load(&env.details_file()).unwrap();
        assert_eq!(details.version.as_deref(), Some("0.4.7"));
    }

    #[tokio::test]
    async fn test_install_keeps_config_file() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let base = env.base_dir().to_path_buf();
        let config_toml = "[elevation]\npassword = \"secret\"\n";
        write_tree(
            &base,
            &[
                (CONFIG_FILE_NAME, config_toml),
                ("src/details.json", r#"{"version": "0.4.6"}"#),
            ],
        );
        let archive = env.update_archive();
        write_zip(&archive, &[("src/details.json", r#"{"version": "0.4.7"}"#)]);

        install_archive(&env, &archive, &base, &KioskConfig::default().update.keep)
            .await
            .unwrap();

        let kept = std::fs::read_to_string(base.join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(kept, config_toml);
        let config = KioskConfig::from_toml(&kept).unwrap();
        assert_eq!(config.elevation_password().as_deref(), Some("secret"));
    }

    #[derive(Default)]
    struct FakeHost {
        /// Answers for `launcher_running`, then `false`.
        launcher: RefCell<VecDeque<bool>>,
        local: Option<String>,
        assets: RefCell<VecDeque<KioskResult<ReleaseAsset>>>,
        installs: RefCell<VecDeque<KioskResult<usize>>>,
        events: RefCell<Vec<&'static str>>,
    }

    impl FakeHost {
        fn new(launcher: &[bool], local: &str, assets: Vec<KioskResult<ReleaseAsset>>) -> Self {
            Self {
                launcher: RefCell::new(launcher.iter().copied().collect()),
                local: Some(local.to_string()),
                assets: RefCell::new(assets.into()),
                ..Default::default()
            }
        }

        fn with_installs(self, installs: Vec<KioskResult<usize>>) -> Self {
            *self.installs.borrow_mut() = installs.into();
            self
        }

        fn count(&self, event: &str) -> usize {
            self.events.borrow().iter().filter(|e| **e == event).count()
        }
    }

    impl UpdateHost for FakeHost {
        async fn launcher_running(&self) -> bool {
            self.launcher.borrow_mut().pop_front().unwrap_or(false)
        }

        async fn internet_ok(&self) -> bool {
            true
        }

        async fn kiosk_idle(&self) -> bool {
            true
        }

        async fn local_version(&self) -> Option<String> {
            self.local.clone()
        }

        async fn latest_asset(&self) -> KioskResult<ReleaseAsset> {
            self.events.borrow_mut().push("latest");
            self.assets
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(KioskError::Remote("no more assets".into())))
        }

        async fn download(&self, _asset: &ReleaseAsset) -> KioskResult<()> {
            self.events.borrow_mut().push("download");
            Ok(())
        }

        async fn reserve(&self) -> bool {
            self.events.borrow_mut().push("reserve");
            true
        }

        async fn stop_apps(&self) {
            self.events.borrow_mut().push("stop");
        }

        async fn install(&self) -> KioskResult<usize> {
            self.events.borrow_mut().push("install");
            self.installs.borrow_mut().pop_front().unwrap_or(Ok(0))
        }

        async fn relaunch(&self) {
            self.events.borrow_mut().push("relaunch");
        }
    }

    fn asset(version: &str) -> KioskResult<ReleaseAsset> {
        Ok(ReleaseAsset::new(
            format!("NizamLab-{}.zip", version),
            format!("https://x/{}", version),
        ))
    }

    fn updater(host: FakeHost) -> Updater<FakeHost> {
        Updater::with_host(host, Duration::ZERO, false)
    }

    #[tokio::test]
    async fn test_up_to_date_never_applies() {
        let host = FakeHost::new(&[true], "0.4.7", vec![asset("0.4.7")]);
        let mut updater = updater(host);

        updater.run().await.unwrap();
        assert_eq!(*updater.host().events.borrow(), vec!["latest"]);
    }

    #[tokio::test]
    async fn test_outdated_release_applied_in_order() {
        let host = FakeHost::new(&[true], "0.4.7", vec![asset("0.4.8")]);
        let mut updater = updater(host);

        assert_eq!(updater.poll_once().await.unwrap(), PollOutcome::Applied);
        assert_eq!(
            *updater.host().events.borrow(),
            vec!["latest", "download", "reserve", "stop", "install", "relaunch"]
        );
    }

    #[tokio::test]
    async fn test_remote_error_retried_next_interval() {
        let host = FakeHost::new(
            &[true, true],
            "0.4.7",
            vec![Err(KioskError::Remote("rate limited".into())), asset("0.4.8")],
        );
        let mut updater = updater(host);

        updater.run().await.unwrap();
        assert_eq!(updater.host().count("latest"), 2);
        assert_eq!(updater.host().count("install"), 1);
    }

    #[tokio::test]
    async fn test_failed_install_relaunches_and_retries() {
        let host = FakeHost::new(&[true], "0.4.7", vec![asset("0.4.8")])
            .with_installs(vec![Err(KioskError::UnsafeEntry("../evil".into())), Ok(2)]);
        let mut updater = updater(host);

        // The launcher is gone after the first stop; the updater keeps going.
        updater.run().await.unwrap();
        let host = updater.host();
        assert_eq!(host.count("latest"), 1);
        assert_eq!(host.count("stop"), 2);
        assert_eq!(host.count("install"), 2);
        assert_eq!(host.count("relaunch"), 2);
        assert!(updater.pending.is_none());
    }

    #[tokio::test]
    async fn test_unsafe_path_ends_run_with_kiosk_relaunched() {
        let host = FakeHost::new(&[true], "0.4.7", vec![asset("0.4.8")])
            .with_installs(vec![Err(KioskError::UnsafePath(PathBuf::from("C:/Windows")))]);
        let mut updater = updater(host);

        let err = updater.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            *updater.host().events.borrow(),
            vec!["latest", "download", "reserve", "stop", "install", "relaunch"]
        );
    }

    #[tokio::test]
    async fn test_launcher_gone_stops_updater() {
        let host = FakeHost::new(&[], "0.4.7", vec![asset("0.4.8")]);
        let mut updater = updater(host);

        updater.run().await.unwrap();
        assert!(updater.host().events.borrow().is_empty());
    }
}
