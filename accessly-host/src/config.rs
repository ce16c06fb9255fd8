//! Configuration management with secure storage
//!
//! Handles:
//! - Elevation account (password in the OS keyring or the config file)
//! - Update source and polling interval
//! - Kill-switch endpoint
//! - Supervisor and kiosk timings

use crate::env::{KioskEnv, ONLY_USER, SCHTASK_NAME};
use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const KEYRING_SERVICE: &str = "accessly-kiosk";
/// Lives in the install base, so it is also on the default update keep list.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub elevation: ElevationConfig,
    pub update: UpdateConfig,
    pub status: StatusConfig,
    pub supervisor: SupervisorConfig,
    pub kiosk: KioskSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    pub account: String,
    pub domain: String,
    pub store_credentials: bool,
    /// Used only when `store_credentials` is off.
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub github_owner: String,
    pub github_repo: String,
    pub branch: String,
    pub release_path: String,
    pub check_interval_secs: u64,
    pub schtask_name: String,
    /// Install-relative prefixes that survive post-extract cleanup.
    pub keep: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// PostgREST base URL, e.g. `https://<project>.supabase.co/rest/v1`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub crash_threshold: usize,
    pub crash_window_secs: f64,
    pub restart_delay_ms: u64,
    pub cooldown_secs: u64,
    pub disabled_sleep_secs: u64,
    pub min_free_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskSettings {
    pub idle_after_secs: u64,
    pub idle_port: u16,
    pub default_user: String,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            account: "Administrator".to_string(),
            domain: ".".to_string(),
            store_credentials: false,
            password: None,
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            github_owner: "MNizamD".to_string(),
            github_repo: "AccesslyKiosk".to_string(),
            branch: "main".to_string(),
            release_path: "releases/latest/download".to_string(),
            check_interval_secs: 15,
            schtask_name: SCHTASK_NAME.to_string(),
            keep: vec![
                "cache/".to_string(),
                "data/".to_string(),
                CONFIG_FILE_NAME.to_string(),
            ],
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            table: "lock_kiosk_status".to_string(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            crash_threshold: 5,
            crash_window_secs: 5.0,
            restart_delay_ms: 250,
            cooldown_secs: 20,
            disabled_sleep_secs: 3,
            min_free_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            idle_after_secs: 15,
            idle_port: 47615,
            default_user: ONLY_USER.to_string(),
        }
    }
}

impl UpdateConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl SupervisorConfig {
    pub fn crash_window(&self) -> Duration {
        Duration::from_secs_f64(self.crash_window_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn disabled_sleep(&self) -> Duration {
        Duration::from_secs(self.disabled_sleep_secs)
    }
}

impl KioskSettings {
    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }
}

impl KioskConfig {
    /// Load config from `ACCESSLY_CONFIG` or `<base>/config.toml`; defaults
    /// when the file is absent.
    pub async fn load(env: &KioskEnv) -> Result<Self> {
        let config_path = Self::config_file_path(env);

        if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config = Self::from_toml(&content)
                .with_context(|| format!("Invalid config {}", config_path.display()))?;
            info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(content)?)
    }

    pub fn config_file_path(env: &KioskEnv) -> PathBuf {
        match std::env::var_os("ACCESSLY_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => env.base_dir().join(CONFIG_FILE_NAME),
        }
    }

    /// Password for the elevation account: keyring first when enabled,
    /// then the config value.
    pub fn elevation_password(&self) -> Option<String> {
        if self.elevation.store_credentials {
            match Self::load_password(&self.elevation.account) {
                Ok(password) => return Some(password),
                Err(e) => debug!("Keyring lookup failed: {}", e),
            }
        }
        self.elevation.password.clone()
    }

    /// Load password from secure OS keyring
    fn load_password(account: &str) -> Result<String> {
        Self::keyring_entry(account)?.get_password().map_err(Into::into)
    }

    /// Save the elevation password to the OS keyring
    pub fn save_password(&self, password: &str) -> Result<()> {
        Self::keyring_entry(&self.elevation.account)?
            .set_password(password)
            .map_err(Into::into)
    }

    /// Delete the elevation password from the keyring
    pub fn delete_password(&self) -> Result<()> {
        Self::keyring_entry(&self.elevation.account)?
            .delete_credential()
            .map_err(Into::into)
    }

    fn keyring_entry(account: &str) -> Result<Entry> {
        Ok(Entry::new(KEYRING_SERVICE, &format!("elevation-{}", account))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KioskConfig::default();
        assert_eq!(config.elevation.account, "Administrator");
        assert_eq!(config.supervisor.crash_threshold, 5);
        assert_eq!(config.supervisor.min_free_bytes, 1 << 30);
        assert_eq!(config.update.check_interval(), Duration::from_secs(15));
        assert_eq!(config.update.keep, vec!["cache/", "data/", "config.toml"]);
        assert_eq!(config.kiosk.default_user, ONLY_USER);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = KioskConfig::from_toml(
            r#"
            [update]
            check_interval_secs = 60

            [elevation]
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.update.check_interval_secs, 60);
        assert_eq!(config.update.github_repo, "AccesslyKiosk");
        assert_eq!(config.elevation.account, "Administrator");
        assert_eq!(config.elevation_password().as_deref(), Some("secret"));
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = KioskConfig::from_toml("   \n").unwrap();
        assert_eq!(config.status.table, "lock_kiosk_status");
    }

    #[test]
    fn test_config_file_path() {
        let env = KioskEnv::with_roots("GVC", "/users", "/programdata", "/windows");
        if std::env::var_os("ACCESSLY_CONFIG").is_none() {
            let path = KioskConfig::config_file_path(&env);
            assert!(path.to_string_lossy().contains("NizamLab"));
            assert!(path.ends_with("config.toml"));
        }
    }
}
