// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version pins: the runtime version and torch package index for each
//! application release range.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use pep440_rs::Version;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::platform::{Accelerator, Os};

const PYTORCH_WHL: &str = "https://download.pytorch.org/whl";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformIndices {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rocm: Option<String>,
}

impl PlatformIndices {
    pub fn get(&self, accelerator: Accelerator) -> Option<&str> {
        match accelerator {
            Accelerator::Cuda => self.cuda.as_deref(),
            Accelerator::Cpu => self.cpu.as_deref(),
            Accelerator::Rocm => self.rocm.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorchIndexUrls {
    #[serde(default)]
    pub win32: PlatformIndices,
    #[serde(default)]
    pub linux: PlatformIndices,
    #[serde(default)]
    pub darwin: PlatformIndices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pins {
    pub python: String,
    #[serde(rename = "torchIndexUrl", default)]
    pub torch_index_url: TorchIndexUrls,
}

impl Pins {
    /// Package index for the host OS and accelerator, if one is pinned.
    pub fn index_url(&self, os: Os, accelerator: Accelerator) -> Option<&str> {
        let indices = match os {
            Os::Windows => &self.torch_index_url.win32,
            Os::Linux => &self.torch_index_url.linux,
            Os::MacOs => &self.torch_index_url.darwin,
            Os::Other(_) => return None,
        };
        indices.get(accelerator)
    }
}

/// Pins keyed by the first application version they apply to.
pub type PinTable = BTreeMap<String, Pins>;

fn whl(path: &str) -> Option<String> {
    Some(format!("{PYTORCH_WHL}/{path}"))
}

/// The built-in pin table.
pub fn builtin_table() -> PinTable {
    let mut table = PinTable::new();
    table.insert(
        "5.0.0".to_owned(),
        Pins {
            python: "3.11".to_owned(),
            torch_index_url: TorchIndexUrls {
                win32: PlatformIndices { cuda: whl("cu124"), ..Default::default() },
                linux: PlatformIndices { cpu: whl("cpu"), rocm: whl("rocm6.1"), cuda: None },
                darwin: PlatformIndices::default(),
            },
        },
    );
    // Catch-all for releases older than the first entry.
    table.insert(
        "0.0.0".to_owned(),
        Pins {
            python: "3.11".to_owned(),
            torch_index_url: TorchIndexUrls {
                win32: PlatformIndices { cuda: whl("cu124"), ..Default::default() },
                linux: PlatformIndices { cpu: whl("cpu"), rocm: whl("rocm5.2"), cuda: None },
                darwin: PlatformIndices::default(),
            },
        },
    );
    table
}

/// Pick the pins for the highest key not above `target`.
pub fn select_pins(table: &PinTable, target: &str) -> anyhow::Result<Pins> {
    let target_version = parse_version(target)?;
    table
        .iter()
        .filter_map(|(key, pins)| parse_version(key).ok().map(|v| (v, pins)))
        .filter(|(v, _)| *v <= target_version)
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, pins)| pins.clone())
        .with_context(|| format!("No pins found for version {target}"))
}

/// Parse a PEP 440 version, tolerating a leading `v`.
pub fn parse_version(input: &str) -> anyhow::Result<Version> {
    let s = input.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    Version::from_str(s).with_context(|| format!("invalid version: {input:?}"))
}

/// Resolves pins for a target application version.
pub trait PinSource: Send + Sync {
    fn pins<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Pins>> + Send + 'a>>;
}

/// Pins from a fixed in-memory table.
#[derive(Debug, Clone)]
pub struct StaticPins {
    table: PinTable,
}

impl StaticPins {
    pub fn new(table: PinTable) -> Self {
        Self { table }
    }
}

impl Default for StaticPins {
    fn default() -> Self {
        Self::new(builtin_table())
    }
}

impl PinSource for StaticPins {
    fn pins<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Pins>> + Send + 'a>> {
        Box::pin(async move { select_pins(&self.table, version) })
    }
}

#[derive(Debug)]
struct CachedTable {
    etag: Option<String>,
    table: PinTable,
    checked_at: Instant,
}

/// Pins fetched from a remote JSON table with ETag revalidation.
///
/// Lookups inside the refresh window reuse the cached table without a
/// request. When the network fails a stale cache is used with a warning.
pub struct RemotePins {
    url: String,
    client: Client,
    refresh: Duration,
    cache: Mutex<Option<CachedTable>>,
}

impl RemotePins {
    pub fn new(url: impl Into<String>, refresh: Duration) -> Self {
        crate::install_crypto_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { url: url.into(), client, refresh, cache: Mutex::new(None) }
    }

    /// Current table, revalidating with the server when the cache is stale.
    pub async fn table(&self) -> anyhow::Result<PinTable> {
        let etag = {
            let cache = self.cache.lock();
            match cache.as_ref() {
                Some(c) if c.checked_at.elapsed() < self.refresh => return Ok(c.table.clone()),
                Some(c) => c.etag.clone(),
                None => None,
            }
        };

        match self.fetch(etag).await {
            Ok(table) => Ok(table),
            Err(e) => {
                let cache = self.cache.lock();
                match cache.as_ref() {
                    Some(c) => {
                        tracing::warn!(url = %self.url, err = %e, "pin fetch failed, using cached table");
                        Ok(c.table.clone())
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch(&self, etag: Option<String>) -> anyhow::Result<PinTable> {
        let mut req = self.client.get(&self.url);
        if let Some(ref tag) = etag {
            tracing::debug!(etag = %tag, "revalidating pins");
            req = req.header(IF_NONE_MATCH, tag);
        }
        let resp = req.send().await.context("requesting pins")?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            let mut cache = self.cache.lock();
            return match cache.as_mut() {
                Some(c) => {
                    c.checked_at = Instant::now();
                    Ok(c.table.clone())
                }
                None => anyhow::bail!("pins server returned 304 without a cached table"),
            };
        }

        let resp = resp.error_for_status().context("requesting pins")?;
        let new_etag =
            resp.headers().get(ETAG).and_then(|v| v.to_str().ok()).map(str::to_owned);
        let table: PinTable = resp.json().await.context("decoding pins")?;

        *self.cache.lock() =
            Some(CachedTable { etag: new_etag, table: table.clone(), checked_at: Instant::now() });
        Ok(table)
    }
}

impl PinSource for RemotePins {
    fn pins<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Pins>> + Send + 'a>> {
        Box::pin(async move {
            let table = self.table().await?;
            select_pins(&table, version)
        })
    }
}

#[cfg(test)]
#[path = "pins_tests.rs"]
mod tests;
