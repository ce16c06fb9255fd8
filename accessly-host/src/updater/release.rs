//! Release lookup on GitHub
//!
//! Features:
//! - Newest archive in the repository's release folder (contents API)
//! - File name of a direct download link (HEAD + Content-Disposition)
//! - Version embedded in archive names, raw `details.json` as fallback
//! - Local vs remote version decision

use crate::cache::{Version, VersionInfo};
use crate::config::UpdateConfig;
use crate::error::{KioskError, KioskResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const FALLBACK_ARCHIVE_NAME: &str = "update.zip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
    pub version: Option<String>,
}

impl ReleaseAsset {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let version = extract_version(&name);
        Self {
            name,
            url: url.into(),
            version,
        }
    }

    pub fn parsed_version(&self) -> Option<Version> {
        self.version.as_deref().and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    UpToDate,
    Outdated { local: String, remote: String },
    Invalid,
}

impl UpdateDecision {
    pub fn needs_update(&self) -> bool {
        !matches!(self, UpdateDecision::UpToDate)
    }
}

/// Compare the installed and published versions. Any difference is an
/// update, not only a newer remote: releases can be rolled back.
pub fn evaluate(local: Option<&str>, remote: Option<&str>) -> UpdateDecision {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            let same = match (local.parse::<Version>(), remote.parse::<Version>()) {
                (Ok(l), Ok(r)) => l == r,
                _ => local.trim() == remote.trim(),
            };
            if same {
                UpdateDecision::UpToDate
            } else {
                UpdateDecision::Outdated {
                    local: local.to_string(),
                    remote: remote.to_string(),
                }
            }
        }
        _ => UpdateDecision::Invalid,
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-([0-9]+(?:\.[0-9]+)+)\.zip$").expect("valid version pattern"))
}

/// `NizamLab-0.4.7.zip` -> `0.4.7`.
pub fn extract_version(filename: &str) -> Option<String> {
    version_pattern()
        .captures(filename)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// File name from a `Content-Disposition` header value.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let (_, tail) = header.rsplit_once("filename=")?;
    let name = tail
        .split(';')
        .next()
        .unwrap_or(tail)
        .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
    (!name.is_empty()).then(|| name.to_string())
}

/// Last non-empty path segment of a URL.
pub fn filename_from_url(url: &reqwest::Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
}

/// Newest downloadable `.zip` of a listing. Parsed versions order first,
/// names break ties and rank archives without a version.
pub fn newest_asset(entries: Vec<ContentEntry>) -> Option<ReleaseAsset> {
    entries
        .into_iter()
        .filter(|e| e.name.to_ascii_lowercase().ends_with(".zip"))
        .filter_map(|e| e.download_url.map(|url| ReleaseAsset::new(e.name, url)))
        .max_by_key(|a| (a.parsed_version(), a.name.clone()))
}

#[derive(Debug, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub download_url: Option<String>,
}

/// Release source backed by the GitHub contents and raw APIs.
#[derive(Clone)]
pub struct ReleaseFeed {
    client: reqwest::Client,
    config: UpdateConfig,
}

impl ReleaseFeed {
    pub fn new(client: reqwest::Client, config: UpdateConfig) -> Self {
        Self { client, config }
    }

    /// Asset to install: the direct link when given, else the newest file
    /// of the release folder. A name without a version falls back to the
    /// repository's `details.json`.
    pub async fn latest_asset(&self, direct_url: Option<&str>) -> KioskResult<ReleaseAsset> {
        let mut asset = match direct_url {
            Some(url) => {
                let name = self.download_filename(url).await?;
                ReleaseAsset::new(name, url)
            }
            None => self
                .listing_asset()
                .await?
                .ok_or_else(|| KioskError::Remote("Could not find update source".into()))?,
        };

        if asset.version.is_none() {
            debug!("No version in {}, asking repository details", asset.name);
            asset.version = self.remote_details().await.ok().and_then(|d| d.version);
        }
        info!("Latest asset: {} ({:?})", asset.name, asset.version);
        Ok(asset)
    }

    async fn listing_asset(&self) -> KioskResult<Option<ReleaseAsset>> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/contents/{}",
            self.config.github_owner, self.config.github_repo, self.config.release_path
        );
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KioskError::Remote(format!(
                "Path '{}' not found in repo {}/{}",
                self.config.release_path, self.config.github_owner, self.config.github_repo
            )));
        }
        if !response.status().is_success() {
            return Err(KioskError::Remote(format!(
                "Failed to fetch release listing: {}",
                response.status()
            )));
        }

        let entries: Vec<ContentEntry> = response.json().await?;
        Ok(newest_asset(entries))
    }

    /// Name the server gives a download: Content-Disposition, then the
    /// final URL path, then `update.zip`.
    pub async fn download_filename(&self, url: &str) -> KioskResult<String> {
        let response = self.client.head(url).send().await?;

        let disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        Ok(disposition
            .or_else(|| filename_from_url(response.url()))
            .unwrap_or_else(|| FALLBACK_ARCHIVE_NAME.to_string()))
    }

    /// `src/details.json` on the release branch.
    pub async fn remote_details(&self) -> KioskResult<VersionInfo> {
        let url = format!(
            "https://raw.githubusercontent.com/{}/{}/{}/src/details.json",
            self.config.github_owner, self.config.github_repo, self.config.branch
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(KioskError::Remote(format!(
                "Failed to fetch remote details: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_decision() {
        assert_eq!(evaluate(Some("1.2.3"), Some("1.2.3")), UpdateDecision::UpToDate);
        assert!(matches!(
            evaluate(Some("1.2.3"), Some("1.2.4")),
            UpdateDecision::Outdated { .. }
        ));
        assert!(evaluate(Some("1.2.4"), Some("1.2.3")).needs_update());
        assert_eq!(evaluate(None, Some("1.2.3")), UpdateDecision::Invalid);
        assert_eq!(evaluate(Some("1.2.3"), None), UpdateDecision::Invalid);
        assert!(!evaluate(Some("v1.2.3"), Some("1.2.3")).needs_update());
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("NizamLab-0.4.7.zip").as_deref(), Some("0.4.7"));
        assert_eq!(extract_version("AccesslyKiosk-1.10.zip").as_deref(), Some("1.10"));
        assert_eq!(extract_version("update.zip"), None);
        assert_eq!(extract_version("NizamLab-0.4.7.tar.gz"), None);
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="NizamLab-0.5.0.zip""#).as_deref(),
            Some("NizamLab-0.5.0.zip")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=a.zip; size=10").as_deref(),
            Some("a.zip")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_filename_from_url() {
        let url = reqwest::Url::parse("https://example.com/releases/NizamLab-0.5.0.zip?raw=1").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("NizamLab-0.5.0.zip"));
        let root = reqwest::Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&root), None);
    }

    fn listing(json: &str) -> Vec<ContentEntry> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_newest_asset_by_version() {
        let entries = listing(
            r#"[
                {"name": "NizamLab-0.4.9.zip", "download_url": "https://x/0.4.9"},
                {"name": "NizamLab-0.4.10.zip", "download_url": "https://x/0.4.10"},
                {"name": "README.md", "download_url": "https://x/README.md"},
                {"name": "old", "download_url": null}
            ]"#,
        );
        let asset = newest_asset(entries).unwrap();
        assert_eq!(asset.name, "NizamLab-0.4.10.zip");
        assert_eq!(asset.version.as_deref(), Some("0.4.10"));
        assert_eq!(asset.url, "https://x/0.4.10");
        assert!(newest_asset(Vec::new()).is_none());
    }

    #[test]
    fn test_newest_asset_without_versions() {
        let entries = listing(
            r#"[
                {"name": "update.zip", "download_url": "https://x/update.zip"},
                {"name": "NOTES.txt", "download_url": "https://x/NOTES.txt"}
            ]"#,
        );
        assert_eq!(newest_asset(entries).unwrap().name, "update.zip");

        let only_docs = listing(r#"[{"name": "README.md", "download_url": "https://x/README.md"}]"#);
        assert!(newest_asset(only_docs).is_none());
    }
}
