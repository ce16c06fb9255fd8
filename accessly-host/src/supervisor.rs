//! Launcher supervision loop
//!
//! Handles:
//! - Kill-switch gate and pre-flight checks (main binary, session log, disk)
//! - Updater copy refresh and elevated spawn on every iteration
//! - Foreground run of the kiosk main with restart on crash
//! - Crash-loop escalation to a forced emergency update

use crate::config::{KioskConfig, SupervisorConfig};
use crate::crash_loop::LoopHistory;
use crate::dialog;
use crate::elevation::{command_line, run_elevated, Credentials};
use crate::env::{KioskEnv, LAUNCHER_STEM};
use crate::error::{KioskError, KioskResult};
use crate::process::ProcessControl;
use crate::status::{fetch_kiosk_status, StatusSource};
use crate::UI_CRASH_EXIT_CODE;
use std::fs::OpenOptions;
use std::path::Path;
use sysinfo::Disks;
use tracing::{debug, error, info, warn};

/// How the launcher ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Kill-switch is off.
    Disabled,
    PreflightFailed(String),
    /// Destruct flag seen between iterations.
    Stopped,
    /// Main exited with code 0.
    CleanExit,
    EmergencyUpdate,
}

impl LaunchOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchOutcome::Disabled | LaunchOutcome::Stopped | LaunchOutcome::CleanExit => 0,
            LaunchOutcome::PreflightFailed(_) | LaunchOutcome::EmergencyUpdate => 1,
        }
    }
}

/// Process-level actions of the launcher.
pub trait Launch {
    /// Refresh the updater copy and start it elevated without waiting.
    async fn spawn_updater(&self, force: bool) -> KioskResult<()>;
    /// Run the kiosk main in the foreground, returning its exit code.
    async fn run_main(&self) -> KioskResult<Option<i32>>;
    /// Kill every tracked process except the launcher.
    async fn kill_apps(&self);
}

/// `Launch` backed by real processes.
pub struct ProcessLauncher {
    env: KioskEnv,
    config: KioskConfig,
}

impl ProcessLauncher {
    pub fn new(env: KioskEnv, config: KioskConfig) -> Self {
        Self { env, config }
    }
}

impl Launch for ProcessLauncher {
    async fn spawn_updater(&self, force: bool) -> KioskResult<()> {
        let copy = self.env.script_updater_copy();
        ProcessControl::duplicate_file(&self.env.script_updater(), &copy)?;

        let base = self.env.base_dir().to_string_lossy().to_string();
        let mut args = vec!["--dir", base.as_str(), "--user", self.env.user()];
        if force {
            args.push("--force");
        }
        let creds = Credentials::from_config(&self.config)?;
        run_elevated(&command_line(&copy, &args), &creds, false).await?;
        Ok(())
    }

    async fn run_main(&self) -> KioskResult<Option<i32>> {
        let main = self.env.script_main().to_string_lossy().to_string();
        let result = ProcessControl::run_foreground(&[main]).await?;
        debug!("Main ran for {} ms", result.execution_time_ms);
        Ok(result.exit_code)
    }

    async fn kill_apps(&self) {
        let names = self.env.all_app_processes(&[LAUNCHER_STEM]);
        ProcessControl::kill_by_names(&names, false).await;
    }
}

pub struct Supervisor<L: Launch> {
    env: KioskEnv,
    config: SupervisorConfig,
    launcher: L,
    history: LoopHistory,
}

impl<L: Launch> Supervisor<L> {
    pub fn new(env: KioskEnv, config: SupervisorConfig, launcher: L) -> Self {
        let history = LoopHistory::new(config.crash_threshold, config.crash_window());
        Self {
            env,
            config,
            launcher,
            history,
        }
    }

    /// Full launcher run: kill-switch, pre-flight, then the supervision loop.
    pub async fn run<S: StatusSource>(&mut self, status_source: &S) -> LaunchOutcome {
        let status = fetch_kiosk_status(status_source, &self.env.cache_file()).await;
        if !status.is_enabled() {
            info!("Disabled on server: {:?}", status.0);
            tokio::time::sleep(self.config.disabled_sleep()).await;
            return LaunchOutcome::Disabled;
        }

        if self.env.flag_destruct_file().exists() {
            self.clear_destruct_flag("app may have crashed");
        }

        if let Err(e) = preflight(&self.env, self.config.min_free_bytes) {
            let msg = e.to_string();
            dialog::show_warning("Launcher Warning", &format!("Cannot start kiosk:\n\n{}", msg));
            return LaunchOutcome::PreflightFailed(msg);
        }

        self.launcher.kill_apps().await;
        self.supervise().await
    }

    async fn supervise(&mut self) -> LaunchOutcome {
        loop {
            if self.env.flag_destruct_file().exists() {
                self.clear_destruct_flag("stopping launcher");
                return LaunchOutcome::Stopped;
            }

            if self.history.record() {
                warn!("Detected crash loop, running emergency update");
                return self.emergency_update().await;
            }

            if let Err(e) = self.launcher.spawn_updater(false).await {
                error!("Error running kiosk: {}", e);
                return self.emergency_update().await;
            }

            match self.launcher.run_main().await {
                Ok(Some(0)) => {
                    info!("Kiosk exited cleanly");
                    return LaunchOutcome::CleanExit;
                }
                Ok(Some(UI_CRASH_EXIT_CODE)) => warn!("Kiosk UI crashed, restarting"),
                Ok(code) => warn!("Kiosk exited with {:?}, restarting", code),
                Err(e) => {
                    error!("Error running kiosk: {}", e);
                    return self.emergency_update().await;
                }
            }

            tokio::time::sleep(self.config.restart_delay()).await;
        }
    }

    /// Ends the launcher; the next launcher process starts with a cold
    /// crash-loop history.
    async fn emergency_update(&self) -> LaunchOutcome {
        self.launcher.kill_apps().await;
        if let Err(e) = self.launcher.spawn_updater(true).await {
            error!("Emergency update failed to start: {}", e);
        }
        tokio::time::sleep(self.config.cooldown()).await;
        LaunchOutcome::EmergencyUpdate
    }

    fn clear_destruct_flag(&self, reason: &str) {
        let flag = self.env.flag_destruct_file();
        if !self.env.is_dir_safe(&flag) {
            return;
        }
        info!("Destruct flag detected, {}", reason);
        if let Err(e) = std::fs::remove_file(&flag) {
            warn!("Could not remove {}: {}", flag.display(), e);
        }
    }
}

/// Main binary present, session log appendable, enough free space on its
/// volume.
pub fn preflight(env: &KioskEnv, min_free_bytes: u64) -> KioskResult<()> {
    let main = env.script_main();
    if !main.exists() {
        return Err(KioskError::Environment(format!(
            "Start file doesn't exist\nCannot find {}",
            main.display()
        )));
    }

    let log_file = env.log_file();
    info!("Checking log file: {}", log_file.display());
    let folder = log_file
        .parent()
        .ok_or_else(|| KioskError::Environment(format!("No folder for {}", log_file.display())))?;
    std::fs::create_dir_all(folder)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| KioskError::Environment(format!("Log file {} is not writable: {}", log_file.display(), e)))?;

    if min_free_bytes > 0 {
        match available_space(folder) {
            Some(free) if free < min_free_bytes => {
                return Err(KioskError::Environment(format!(
                    "Not enough free space ({:.2} GB available)",
                    free as f64 / (1024.0 * 1024.0 * 1024.0)
                )));
            }
            Some(_) => {}
            None => debug!("No disk found for {}", folder.display()),
        }
    }
    Ok(())
}

/// Free bytes on the volume holding `path` (longest mount point prefix).
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}
