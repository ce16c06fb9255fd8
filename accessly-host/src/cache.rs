//! JSON documents kept on disk: `details.json` and the kill-switch cache

use crate::error::{KioskError, KioskResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> KioskResult<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read a JSON object, logging and returning `None` on any failure.
pub fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    match read_json::<Value>(path) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            warn!("JSON read error: {} is not an object ({})", path.display(), other);
            None
        }
        Err(e) => {
            warn!("JSON read error: {}", e);
            None
        }
    }
}

/// Create or overwrite `path` with 4-space indented JSON, creating parents.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> KioskResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    std::fs::write(path, buf)?;
    Ok(())
}

/// Dotted `major.minor.patch` release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for Version {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KioskError::Config(format!("Invalid version: {}", s));
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let mut next = || -> KioskResult<u64> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u64>()
                .map_err(|_| invalid())
        };
        let version = Version {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// `details.json` shipped inside every release.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: Option<String>,
    pub updated: Option<String>,
}

impl VersionInfo {
    pub fn load(path: &Path) -> KioskResult<Self> {
        if !path.exists() {
            return Err(KioskError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Missing details: {}", path.display()),
            )));
        }
        read_json(path)
    }
}

/// Cached kill-switch document, `{"ENABLED": bool, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KioskStatus(pub Map<String, Value>);

pub const ENABLED_KEY: &str = "ENABLED";

impl KioskStatus {
    pub fn enabled(value: bool) -> Self {
        let mut map = Map::new();
        map.insert(ENABLED_KEY.to_string(), Value::Bool(value));
        Self(map)
    }

    /// Missing key means enabled.
    pub fn is_enabled(&self) -> bool {
        self.0.get(ENABLED_KEY).map(truthy).unwrap_or(true)
    }
}

/// Truthiness of a loosely typed kill-switch value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
