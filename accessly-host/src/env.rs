//! Kiosk environment: install/data/temp layout and directory safety
//!
//! A `KioskEnv` is built once at process start and passed by reference.
//! Switching the active user produces a new value instead of mutating a
//! shared one. Every destructive operation (extract, cleanup, flag removal)
//! goes through `is_dir_safe` first.

use crate::error::{KioskError, KioskResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PROJECT_NAME: &str = "NizamLab";
pub const ONLY_USER: &str = "GVC";
pub const SCHTASK_NAME: &str = "AccesslyKiosk";

pub const LAUNCHER_STEM: &str = "accessly-launcher";
pub const UPDATER_STEM: &str = "accessly-updater";
pub const UPDATER_COPY_STEM: &str = "accessly-updater-copy";
pub const MAIN_STEM: &str = "accessly-main";
pub const CMD_STEM: &str = "accessly-cmd";

/// Executable file name for a binary stem on the current platform.
pub fn exe_name(stem: &str) -> String {
    format!("{}{}", stem, std::env::consts::EXE_SUFFIX)
}

pub fn current_user() -> String {
    std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "Unknown".to_string())
}

pub fn pc_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "UNKNOWN-PC".to_string())
}

/// Check that a local account exists.
pub fn user_exists(name: &str) -> bool {
    let users = sysinfo::Users::new_with_refreshed_list();
    users.iter().any(|u| u.name().eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone)]
pub struct KioskEnv {
    user: String,
    users_root: PathBuf,
    program_data: PathBuf,
    windir: PathBuf,
    base_dir: PathBuf,
}

impl KioskEnv {
    /// Build the environment for `user` (or the invoking user) from the
    /// process environment, with Windows defaults for missing variables.
    pub fn detect(user: Option<&str>) -> KioskResult<Self> {
        let user = match user {
            Some(name) => {
                if !user_exists(name) {
                    return Err(KioskError::UnknownUser(name.to_string()));
                }
                name.to_string()
            }
            None => current_user(),
        };

        let users_root = dirs::home_dir()
            .and_then(|home| home.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from(r"C:\Users"));
        let program_data = std::env::var_os("PROGRAMDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        let windir = std::env::var_os("WINDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));

        Ok(Self::with_roots(&user, users_root, program_data, windir))
    }

    /// Build an environment from explicit roots. No account check is done.
    pub fn with_roots(
        user: &str,
        users_root: impl Into<PathBuf>,
        program_data: impl Into<PathBuf>,
        windir: impl Into<PathBuf>,
    ) -> Self {
        let program_data = program_data.into();
        let base_dir = program_data.join(PROJECT_NAME);
        Self {
            user: user.to_string(),
            users_root: users_root.into(),
            program_data,
            windir: windir.into(),
            base_dir,
        }
    }

    /// Same environment for another account.
    pub fn with_user(&self, user: &str) -> KioskResult<Self> {
        if !user_exists(user) {
            return Err(KioskError::UnknownUser(user.to_string()));
        }
        debug!("Active user changed to: {}", user);
        Ok(Self {
            user: user.to_string(),
            ..self.clone()
        })
    }

    /// Same environment installed under another base directory.
    pub fn with_base_dir(&self, dir: impl AsRef<Path>) -> KioskResult<Self> {
        let dir = self.safe_path(dir)?;
        Ok(Self {
            base_dir: dir,
            ..self.clone()
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    // ---------- roots ----------

    pub fn user_profile(&self) -> PathBuf {
        self.users_root.join(&self.user)
    }

    pub fn localappdata(&self) -> PathBuf {
        self.user_profile().join("AppData").join("Local")
    }

    pub fn temp(&self) -> PathBuf {
        self.localappdata().join("Temp")
    }

    pub fn localdata_dir(&self) -> PathBuf {
        self.localappdata().join(PROJECT_NAME)
    }

    pub fn program_data(&self) -> &Path {
        &self.program_data
    }

    pub fn windir(&self) -> &Path {
        &self.windir
    }

    // ---------- directory structure ----------

    /// Install root; the archive is extracted here.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Executables and `details.json`.
    pub fn app_dir(&self) -> PathBuf {
        self.base_dir.join("src")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.localdata_dir().join("data")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.localdata_dir().join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.localdata_dir().join("logs")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp().join(PROJECT_NAME)
    }

    /// Create the data, cache and temp folders after checking they are safe.
    pub fn prepare_dirs(&self) -> KioskResult<()> {
        for dir in [self.data_dir(), self.cache_dir(), self.temp_dir()] {
            let dir = self.safe_path(&dir)?;
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    // ---------- files ----------

    pub fn student_csv(&self) -> PathBuf {
        self.data_dir().join("Students.csv")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir().join("StudentLogs.csv")
    }

    pub fn flag_destruct_file(&self) -> PathBuf {
        self.temp_dir().join("STOP_LAUNCHER.flag")
    }

    pub fn flag_idle_file(&self) -> PathBuf {
        self.temp_dir().join("IDLE.flag")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir().join("lock_kiosk_status.json")
    }

    pub fn details_file(&self) -> PathBuf {
        self.app_dir().join("details.json")
    }

    pub fn update_archive(&self) -> PathBuf {
        self.base_dir.join("update.zip")
    }

    pub fn script_launcher(&self) -> PathBuf {
        self.app_dir().join(exe_name(LAUNCHER_STEM))
    }

    pub fn script_main(&self) -> PathBuf {
        self.app_dir().join(exe_name(MAIN_STEM))
    }

    pub fn script_updater(&self) -> PathBuf {
        self.app_dir().join(exe_name(UPDATER_STEM))
    }

    pub fn script_updater_copy(&self) -> PathBuf {
        self.app_dir().join(exe_name(UPDATER_COPY_STEM))
    }

    pub fn script_cmd(&self) -> PathBuf {
        self.app_dir().join(exe_name(CMD_STEM))
    }

    /// Executable names of every tracked kiosk process, minus any whose
    /// name contains one of `exclude` (case-insensitive).
    pub fn all_app_processes(&self, exclude: &[&str]) -> Vec<String> {
        let excludes: Vec<String> = exclude.iter().map(|e| e.to_lowercase()).collect();
        [LAUNCHER_STEM, UPDATER_STEM, UPDATER_COPY_STEM, MAIN_STEM]
            .iter()
            .map(|stem| exe_name(stem))
            .filter(|name| {
                let lower = name.to_lowercase();
                !excludes.iter().any(|ex| lower.contains(ex.as_str()))
            })
            .collect()
    }

    // ---------- safety ----------

    /// Lower-case, `\`-separated, variable-expanded and lexically resolved
    /// form of `raw`, used for prefix comparisons only.
    pub fn normalize_path(&self, raw: &str) -> String {
        let expanded = self.expand_vars(raw);
        let unified = expanded.replace('/', "\\").to_lowercase();
        let rooted = unified.starts_with('\\');

        let mut parts: Vec<&str> = Vec::new();
        for part in unified.split('\\') {
            match part {
                "" | "." => {}
                ".." => {
                    let at_drive = parts.len() == 1 && is_drive(parts[0]);
                    if !at_drive {
                        parts.pop();
                    }
                }
                other => parts.push(other),
            }
        }

        let joined = parts.join("\\");
        if rooted {
            format!("\\{}", joined)
        } else {
            joined
        }
    }

    /// True when destructive operations may touch `path`.
    pub fn is_dir_safe(&self, path: impl AsRef<Path>) -> bool {
        let normalized = self.normalize_path(&path.as_ref().to_string_lossy());

        let exemptions = [
            format!(r"%programdata%\{}", PROJECT_NAME),
            self.temp_dir().to_string_lossy().to_string(),
            self.localdata_dir().to_string_lossy().to_string(),
        ];
        if exemptions
            .iter()
            .any(|ex| is_under(&normalized, &self.normalize_path(ex)))
        {
            return true;
        }

        let unsafe_dirs = [
            self.windir.to_string_lossy().to_string(),
            "%localappdata%".to_string(),
            "%programdata%".to_string(),
            self.user_profile().to_string_lossy().to_string(),
            r"c:\windows".to_string(),
            r"c:\program files".to_string(),
            r"c:\program files (x86)".to_string(),
            r"c:\users\default".to_string(),
            r"c:\users\public\desktop".to_string(),
            r"c:\$recycle.bin".to_string(),
            r"c:\system volume information".to_string(),
        ];
        if unsafe_dirs
            .iter()
            .any(|unsafe_dir| is_under(&normalized, &self.normalize_path(unsafe_dir)))
        {
            warn!("[BLOCKED]: {}", normalized);
            return false;
        }

        // Drive roots and the filesystem root itself.
        if normalized.is_empty() || normalized == "\\" || is_drive(&normalized) {
            warn!("[BLOCKED]: {}", normalized);
            return false;
        }
        true
    }

    /// `path` unchanged if it is safe, `UnsafePath` otherwise.
    pub fn safe_path(&self, path: impl AsRef<Path>) -> KioskResult<PathBuf> {
        let path = path.as_ref();
        if self.is_dir_safe(path) {
            Ok(path.to_path_buf())
        } else {
            Err(KioskError::UnsafePath(path.to_path_buf()))
        }
    }

    fn expand_vars(&self, raw: &str) -> String {
        let raw = match raw.strip_prefix('~') {
            Some(rest) => format!("{}{}", self.user_profile().display(), rest),
            None => raw.to_string(),
        };

        let mut out = String::with_capacity(raw.len());
        let mut rest = raw.as_str();
        while let Some(start) = rest.find('%') {
            let after = &rest[start + 1..];
            match after.find('%') {
                Some(end) => {
                    let name = &after[..end];
                    out.push_str(&rest[..start]);
                    match self.lookup_var(name) {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push('%');
                            out.push_str(name);
                            out.push('%');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        out
    }

    fn lookup_var(&self, name: &str) -> Option<String> {
        let known = match name.to_ascii_uppercase().as_str() {
            "PROGRAMDATA" => Some(self.program_data.clone()),
            "LOCALAPPDATA" => Some(self.localappdata()),
            "USERPROFILE" => Some(self.user_profile()),
            "WINDIR" => Some(self.windir.clone()),
            "TEMP" | "TMP" => Some(self.temp()),
            _ => None,
        };
        known
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| std::env::var(name).ok())
    }
}

fn is_drive(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_under(path: &str, root: &str) -> bool {
    if root.is_empty() {
        return false;
    }
    path == root || path.starts_with(&format!("{}\\", root))
}
