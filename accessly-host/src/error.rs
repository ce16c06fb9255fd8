//! Error taxonomy shared by the launcher, updater, kiosk and console
//!
//! Classes and how callers treat them:
//! - Environment: fatal to the current launch attempt, surfaced in a dialog
//! - Network: transient, retried on the next poll or replaced by a cached value
//! - Process / Elevation: fatal to the single operation that raised them
//! - UnsafePath: always fatal, never retried

use std::path::PathBuf;
use thiserror::Error;

pub type KioskResult<T> = std::result::Result<T, KioskError>;

#[derive(Debug, Error)]
pub enum KioskError {
    #[error("Environment check failed: {0}")]
    Environment(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote source unavailable: {0}")]
    Remote(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Elevation failed: {0}")]
    Elevation(String),

    #[error("Unsafe directory or invalid path: {}", .0.display())]
    UnsafePath(PathBuf),

    #[error("Blocked unsafe archive entry: {0}")]
    UnsafeEntry(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("User '{0}' does not exist on this computer")]
    UnknownUser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl KioskError {
    /// Unsafe destinations abort immediately instead of being retried.
    /// A bad archive entry is not fatal: the next release may be clean.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KioskError::UnsafePath(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_paths_are_fatal() {
        assert!(KioskError::UnsafePath(PathBuf::from("C:/Windows")).is_fatal());
        assert!(!KioskError::UnsafeEntry("../evil.txt".into()).is_fatal());
        assert!(!KioskError::Remote("offline".into()).is_fatal());
        assert!(!KioskError::Process("not found".into()).is_fatal());
    }
}
