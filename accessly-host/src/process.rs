//! Process control for the kiosk executables
//!
//! Handles:
//! - Running-check by executable name (excluding the calling process)
//! - Kill by name
//! - Foreground run with exit code, detached background run
//! - File duplication for the updater copy
//! - Admin check

use crate::error::{KioskError, KioskResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

/// Pause after each kill so the OS releases file handles.
const KILL_SETTLE: Duration = Duration::from_secs(3);

/// A running process matched by name.
#[derive(Debug, Clone, Serialize)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Result of a foreground run.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u128,
}

pub struct ProcessControl;

impl ProcessControl {
    /// First process whose name matches `name` case-insensitively, skipping
    /// the current process.
    pub fn find_running(name: &str) -> Option<RunningProcess> {
        let current = sysinfo::get_current_pid().ok();
        let mut sys = System::new();
        sys.refresh_processes();

        sys.processes()
            .values()
            .filter(|p| Some(p.pid()) != current)
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .map(|p| RunningProcess {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                exe: p.exe().map(Path::to_path_buf),
            })
    }

    pub fn is_running(name: &str) -> bool {
        Self::find_running(name).is_some()
    }

    /// Kill every process (except this one) whose name is in `names`.
    /// Returns how many were killed.
    pub async fn kill_by_names(names: &[String], silent: bool) -> usize {
        let current = sysinfo::get_current_pid().ok();
        let mut killed = 0;

        for name in names {
            let mut sys = System::new();
            sys.refresh_processes();
            let targets: Vec<sysinfo::Pid> = sys
                .processes()
                .values()
                .filter(|p| Some(p.pid()) != current)
                .filter(|p| p.name().eq_ignore_ascii_case(name))
                .map(|p| p.pid())
                .collect();

            if targets.is_empty() && !silent {
                info!("No such process: {}", name);
            }
            for pid in targets {
                let done = sys.process(pid).map(|p| p.kill()).unwrap_or(false);
                if done {
                    killed += 1;
                    if !silent {
                        info!("{} process killed (PID {})", name, pid);
                    }
                    tokio::time::sleep(KILL_SETTLE).await;
                } else {
                    warn!("Failed to kill {} (PID {})", name, pid);
                }
            }
        }
        killed
    }

    /// Run `cmd` attached to this console and wait for its exit.
    pub async fn run_foreground(cmd: &[String]) -> KioskResult<ExecutionResult> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| KioskError::Process("Empty command".into()))?;
        let start_time = Instant::now();
        debug!("Running in foreground: {:?}", cmd);

        let status = AsyncCommand::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| KioskError::Process(format!("Failed to start {}: {}", program, e)))?;

        Ok(ExecutionResult {
            success: status.success(),
            exit_code: status.code(),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Start `cmd` detached from this process, working directory in temp.
    pub fn spawn_background(cmd: &[String]) -> KioskResult<u32> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| KioskError::Process("Empty command".into()))?;
        if !Path::new(program).exists() {
            return Err(KioskError::Process(format!("{} not found", program)));
        }

        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command
            .spawn()
            .map_err(|e| KioskError::Process(format!("Failed to start {}: {}", program, e)))?;
        Ok(child.id())
    }

    /// Start `cmd` in the background unless its executable already runs.
    /// Returns the new pid, `None` when it was running.
    pub fn spawn_if_not_running(cmd: &[String]) -> KioskResult<Option<u32>> {
        let name = cmd
            .first()
            .and_then(|program| Path::new(program).file_name())
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| KioskError::Process("Empty command".into()))?;
        if Self::is_running(&name) {
            debug!("{} already running", name);
            return Ok(None);
        }
        let pid = Self::spawn_background(cmd)?;
        info!("Started {} in background (PID {})", name, pid);
        Ok(Some(pid))
    }

    /// Replace `copy` with a fresh copy of `src`.
    pub fn duplicate_file(src: &Path, copy: &Path) -> KioskResult<()> {
        if copy.exists() {
            std::fs::remove_file(copy)?;
        }
        std::fs::copy(src, copy)?;
        Ok(())
    }

    /// File name of the running executable.
    pub fn current_executable_name() -> Option<String> {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
    }

    /// Whether this process runs with administrative rights.
    #[cfg(windows)]
    pub fn is_elevated() -> bool {
        unsafe { winapi::um::shlobj::IsUserAnAdmin() != 0 }
    }

    #[cfg(unix)]
    pub fn is_elevated() -> bool {
        nix::unistd::Uid::effective().is_root()
    }

    #[cfg(not(any(windows, unix)))]
    pub fn is_elevated() -> bool {
        false
    }

    /// Log whether `name` runs elevated.
    pub fn check_admin(name: &str) -> bool {
        let elevated = Self::is_elevated();
        if elevated {
            info!("{} is elevated as admin", name);
        } else {
            info!("{} is running as standard user", name);
        }
        elevated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Vec<String> {
        if cfg!(target_os = "windows") {
            vec!["cmd".into(), "/C".into(), script.into()]
        } else {
            vec!["sh".into(), "-c".into(), script.into()]
        }
    }

    #[tokio::test]
    async fn test_foreground_exit_code() {
        let ok = ProcessControl::run_foreground(&shell("exit 0")).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.exit_code, Some(0));

        let crashed = ProcessControl::run_foreground(&shell("exit 3")).await.unwrap();
        assert!(!crashed.success);
        assert_eq!(crashed.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_foreground_missing_program() {
        let err = ProcessControl::run_foreground(&["/definitely/not/here".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, KioskError::Process(_)));
        assert!(ProcessControl::run_foreground(&[]).await.is_err());
    }

    #[test]
    fn test_unknown_process_not_running() {
        assert!(ProcessControl::find_running("no-such-kiosk-process.exe").is_none());
    }

    #[tokio::test]
    async fn test_kill_unknown_names_is_noop() {
        let killed =
            ProcessControl::kill_by_names(&["no-such-kiosk-process.exe".to_string()], false).await;
        assert_eq!(killed, 0);
    }

    #[test]
    fn test_background_requires_existing_program() {
        let err = ProcessControl::spawn_background(&["/definitely/not/here".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(ProcessControl::spawn_if_not_running(&[]).is_err());
    }

    #[test]
    fn test_duplicate_file_replaces_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("updater.exe");
        let copy = dir.path().join("updater-copy.exe");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&copy, b"old build").unwrap();

        ProcessControl::duplicate_file(&src, &copy).unwrap();
        assert_eq!(std::fs::read(&copy).unwrap(), b"new");
    }
}
