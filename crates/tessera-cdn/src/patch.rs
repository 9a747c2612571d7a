//! Client for the patch service (version and CDN discovery).

use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::manifest::{self, CdnsEntry, VersionsEntry};
use crate::{CdnError, Region, Result};

/// Bounded retries for the tiny discovery fetches.
const MAX_RETRIES: u32 = 2;

/// Base delay before the first retry; doubles per attempt.
const BACKOFF_MS: u64 = 100;

/// A patch server endpoint.
#[derive(Debug, Clone)]
pub struct PatchServer {
    client: Client,
    base: String,
}

impl PatchServer {
    /// The well-known patch endpoint for a region.
    pub fn new(client: Client, region: Region) -> Self {
        Self::with_base(client, format!("http://{region}.patch.battle.net:1119"))
    }

    /// A patch endpoint at an explicit base URL.
    pub fn with_base(client: Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }

    /// Fetch and parse `/<product>/versions`.
    pub async fn versions(&self, product: &str) -> Result<Vec<VersionsEntry>> {
        let text = self.fetch(product, "versions").await?;
        manifest::parse_versions(&text)
    }

    /// Fetch and parse `/<product>/cdns`.
    pub async fn cdns(&self, product: &str) -> Result<Vec<CdnsEntry>> {
        let text = self.fetch(product, "cdns").await?;
        manifest::parse_cdns(&text)
    }

    /// The versions row for a region.
    pub async fn version_for(&self, product: &str, region: Region) -> Result<VersionsEntry> {
        self.versions(product)
            .await?
            .into_iter()
            .find(|v| v.region == region.as_str())
            .ok_or_else(|| CdnError::RegionNotFound(region.to_string()))
    }

    /// The cdns row for a region.
    pub async fn cdns_for(&self, product: &str, region: Region) -> Result<CdnsEntry> {
        self.cdns(product)
            .await?
            .into_iter()
            .find(|c| c.name == region.as_str())
            .ok_or_else(|| CdnError::RegionNotFound(region.to_string()))
    }

    async fn fetch(&self, product: &str, endpoint: &str) -> Result<String> {
        let url = format!("{}/{}/{}", self.base, product, endpoint);
        debug!("fetching {url}");

        let mut attempt = 0;
        loop {
            let result = async {
                let response = self.client.get(&url).send().await?;
                let response = response.error_for_status()?;
                response.text().await
            }
            .await;

            match result {
                Ok(text) => return Ok(text),
                Err(e) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = BACKOFF_MS << (attempt - 1);
                    warn!("patch fetch failed ({e}), retry {attempt} in {delay}ms");
                    sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
