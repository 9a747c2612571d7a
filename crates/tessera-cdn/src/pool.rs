//! The mirror pool: latency-ranked content hosts for one build.
//!
//! Mirrors come from the CDN listing plus a static archival fallback.
//! At construction every mirror gets a latency probe (a TCP connect,
//! 400 ms per mirror inside a 1 s overall budget); the pool is then the
//! probe-sorted list and its order never changes. Fetches walk the list
//! left to right under the pool mutex, so concurrent requests observe
//! the same order.

use reqwest::{Client, Response, StatusCode};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::manifest::CdnsEntry;
use crate::Result;

/// Community mirror appended after the listed hosts, whatever its ping.
const FALLBACK_HOST: &str = "cdn.arctium.tools";

/// Per-mirror probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// Overall probing budget.
const PROBE_BUDGET: Duration = Duration::from_secs(1);

/// One ranked mirror.
#[derive(Debug, Clone)]
struct Mirror {
    /// URL prefix up to and including the path stem.
    base: String,
    /// Measured round-trip estimate; `None` means unreachable.
    rtt: Option<Duration>,
}

/// A latency-ranked pool of mirrors.
pub struct MirrorPool {
    client: Client,
    mirrors: Mutex<Vec<Mirror>>,
}

impl MirrorPool {
    /// Build a pool from a CDN listing row, appending the fallback
    /// mirror and ranking everything by probe latency.
    pub async fn from_cdns_entry(client: Client, entry: &CdnsEntry) -> Self {
        let mut bases: Vec<String> = entry
            .hosts
            .iter()
            .map(|host| format!("http://{}/{}", host, entry.path))
            .collect();
        let fallback = format!("http://{}/{}", FALLBACK_HOST, entry.path);
        if !bases.contains(&fallback) {
            bases.push(fallback);
        }
        Self::from_bases(client, bases).await
    }

    /// Build a ranked pool from explicit base URLs.
    pub async fn from_bases(client: Client, bases: Vec<String>) -> Self {
        let mirrors = rank(bases).await;
        debug!(
            "mirror pool: {:?}",
            mirrors.iter().map(|m| &m.base).collect::<Vec<_>>()
        );
        Self {
            client,
            mirrors: Mutex::new(mirrors),
        }
    }

    /// Build a pool in declared order, skipping the probes. Used when
    /// latency ranking is unwanted or impossible.
    pub fn fixed(client: Client, bases: Vec<String>) -> Self {
        let mirrors = bases
            .into_iter()
            .map(|base| Mirror { base, rtt: None })
            .collect();
        Self {
            client,
            mirrors: Mutex::new(mirrors),
        }
    }

    /// Mirror base URLs in their current (stable) order.
    pub async fn bases(&self) -> Vec<String> {
        self.mirrors.lock().await.iter().map(|m| m.base.clone()).collect()
    }

    /// Fetch `path` from the first mirror that answers.
    ///
    /// When `expected_len` is nonzero a HEAD runs first: 405 counts as
    /// "no answer" and falls through to the GET, a present
    /// Content-Length must match or the mirror is rejected. Any non-2xx
    /// or connection error moves on to the next mirror. `Ok(None)`
    /// means every mirror was exhausted; the caller decides whether
    /// that is fatal.
    pub async fn download(&self, path: &str, expected_len: u64) -> Result<Option<Response>> {
        let mirrors = self.mirrors.lock().await;

        for mirror in mirrors.iter() {
            let url = format!("{}/{}", mirror.base, path);

            if expected_len > 0 && !self.head_accepts(&url, expected_len).await {
                continue;
            }

            match self.client.get(&url).send().await {
                Ok(r) if r.status().is_success() => return Ok(Some(r)),
                Ok(r) => warn!("{url}: status {}", r.status()),
                Err(e) => warn!("{url}: {e}"),
            }
        }

        Ok(None)
    }

    /// Fetch a byte range of `path` from the first mirror that answers.
    pub async fn download_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Option<Response>> {
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let mirrors = self.mirrors.lock().await;

        for mirror in mirrors.iter() {
            let url = format!("{}/{}", mirror.base, path);
            let request = self.client.get(&url).header(reqwest::header::RANGE, &range);
            match request.send().await {
                Ok(r) if r.status().is_success() => return Ok(Some(r)),
                Ok(r) => warn!("{url} [{range}]: status {}", r.status()),
                Err(e) => warn!("{url} [{range}]: {e}"),
            }
        }

        Ok(None)
    }

    /// HEAD preflight: `true` when the mirror is worth a GET.
    async fn head_accepts(&self, url: &str, expected_len: u64) -> bool {
        match self.client.head(url).send().await {
            // Some mirrors never implement HEAD; that is not a verdict.
            Ok(r) if r.status() == StatusCode::METHOD_NOT_ALLOWED => true,
            Ok(r) if r.status().is_success() => match r.content_length() {
                Some(len) if len != expected_len => {
                    warn!("{url}: HEAD length {len}, expected {expected_len}");
                    false
                }
                _ => true,
            },
            Ok(r) => {
                warn!("{url}: HEAD status {}", r.status());
                false
            }
            Err(e) => {
                warn!("{url}: HEAD {e}");
                false
            }
        }
    }
}

/// Probe every base and return the mirrors sorted by latency,
/// unreachable ones last. The sort is stable, so when no probe answers
/// (or the budget lapses) the declared order survives.
async fn rank(bases: Vec<String>) -> Vec<Mirror> {
    let probes = bases.iter().map(|base| {
        let authority = authority_of(base);
        async move {
            let started = Instant::now();
            let connect = TcpStream::connect(&authority);
            match tokio::time::timeout(PROBE_TIMEOUT, connect).await {
                Ok(Ok(_)) => Some(started.elapsed()),
                _ => None,
            }
        }
    });

    let rtts = match tokio::time::timeout(
        PROBE_BUDGET,
        futures_util::future::join_all(probes),
    )
    .await
    {
        Ok(rtts) => rtts,
        // Budget lapsed; treat every mirror as unranked.
        Err(_) => vec![None; bases.len()],
    };

    let mut mirrors: Vec<Mirror> = bases
        .into_iter()
        .zip(rtts)
        .map(|(base, rtt)| Mirror { base, rtt })
        .collect();
    mirrors.sort_by_key(|m| m.rtt.unwrap_or(Duration::MAX));
    mirrors
}

/// `host:port` part of a base URL, defaulting to port 80.
fn authority_of(base: &str) -> String {
    let rest = base
        .strip_prefix("http://")
        .or_else(|| base.strip_prefix("https://"))
        .unwrap_or(base);
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    }
}
