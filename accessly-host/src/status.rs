//! Remote kill-switch with local cache fallback
//!
//! The flag lives in a hosted Postgres table (`key`, `value`, `deleted_at`)
//! read through its REST gateway. Every successful read is cached; on any
//! failure the cache is used, and without a cache the kiosk stays enabled.

use crate::cache::{read_json_object, write_json, KioskStatus, ENABLED_KEY};
use crate::config::StatusConfig;
use crate::error::{KioskError, KioskResult};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRow {
    pub key: String,
    pub value: Value,
}

/// Where kill-switch rows come from.
pub trait StatusSource {
    async fn fetch_rows(&self) -> KioskResult<Vec<StatusRow>>;
}

/// PostgREST reader for the kill-switch table.
pub struct RestStatusSource {
    client: reqwest::Client,
    config: StatusConfig,
}

impl RestStatusSource {
    pub fn new(client: reqwest::Client, config: StatusConfig) -> Self {
        Self { client, config }
    }
}

impl StatusSource for RestStatusSource {
    async fn fetch_rows(&self) -> KioskResult<Vec<StatusRow>> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| KioskError::Remote("No status endpoint configured".into()))?;
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), self.config.table);

        let mut request = self
            .client
            .get(&url)
            .query(&[("select", "key,value"), ("deleted_at", "is.null")]);
        if let Some(key) = &self.config.api_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(KioskError::Remote(format!(
                "Status fetch failed: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

/// Current kill-switch state. Never fails: falls back to the cache, then to
/// an enabled default that is written as the new cache.
pub async fn fetch_kiosk_status<S: StatusSource>(source: &S, cache_file: &Path) -> KioskStatus {
    match fetch_remote(source).await {
        Ok(status) => {
            if let Err(e) = write_json(cache_file, &status) {
                warn!("Could not cache kiosk status: {}", e);
            }
            status
        }
        Err(e) => {
            warn!("Fetching failed: {}", e);
            cached_status(cache_file)
        }
    }
}

async fn fetch_remote<S: StatusSource>(source: &S) -> KioskResult<KioskStatus> {
    let rows = source.fetch_rows().await?;
    let row = rows
        .into_iter()
        .find(|row| row.key == ENABLED_KEY)
        .ok_or_else(|| KioskError::Remote("Could not find kiosk status".into()))?;

    let mut map = serde_json::Map::new();
    map.insert(ENABLED_KEY.to_string(), Value::Bool(crate::cache::truthy(&row.value)));
    Ok(KioskStatus(map))
}

fn cached_status(cache_file: &Path) -> KioskStatus {
    if cache_file.exists() {
        if let Some(map) = read_json_object(cache_file) {
            return KioskStatus(map);
        }
    }

    info!("No usable status cache, defaulting to enabled");
    let fallback = KioskStatus::enabled(true);
    if let Err(e) = write_json(cache_file, &fallback) {
        warn!("Could not write status cache: {}", e);
    }
    fallback
}
