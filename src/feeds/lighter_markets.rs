//! Lighter market directory (REST)
//!
//! `GET /api/markets` returns `[{"symbol": "BTC", "market_index": 1}, ...]`. The
//! upstream is flaky (503s), so results are cached and a failed fetch never
//! clears what we already know. The stats stream uses this to name markets whose
//! payload carries no `symbol`.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::feeds::fields::value_to_f64;
use crate::state::normalize_asset;

pub const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct DirectoryCache {
    by_id: HashMap<i64, String>,
    fetched_at: Option<Instant>,
}

pub struct MarketDirectory {
    client: Client,
    url: String,
    cache: RwLock<DirectoryCache>,
}

impl MarketDirectory {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(6))
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("failed to build market directory HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            cache: RwLock::new(DirectoryCache::default()),
        })
    }

    /// Cached symbol for a market id. Never blocks on the network.
    pub fn symbol_for(&self, market_id: i64) -> Option<String> {
        self.cache.read().by_id.get(&market_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refresh the cache unless it is younger than [`CACHE_TTL`]. Returns the
    /// number of known markets; fetch failures are logged and keep the old cache.
    pub async fn refresh(&self) -> usize {
        let fresh = self
            .cache
            .read()
            .fetched_at
            .is_some_and(|t| t.elapsed() < CACHE_TTL);
        if fresh {
            return self.len();
        }

        match self.fetch().await {
            Ok(entries) if !entries.is_empty() => {
                let mut cache = self.cache.write();
                cache.by_id.extend(entries);
                cache.fetched_at = Some(Instant::now());
                debug!(markets = cache.by_id.len(), "market directory refreshed");
                cache.by_id.len()
            }
            Ok(_) => {
                debug!("market directory returned no usable entries");
                self.len()
            }
            Err(e) => {
                warn!(error = %e, "market directory fetch failed");
                self.len()
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<(i64, String)>> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("market directory request failed")?
            .error_for_status()
            .context("market directory returned error status")?
            .json()
            .await
            .context("failed to parse market directory response")?;
        Ok(parse_directory(&body))
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, market_id: i64, symbol: &str) {
        self.cache
            .write()
            .by_id
            .insert(market_id, normalize_asset(symbol));
    }
}

/// Extract `(market_index, SYMBOL)` pairs; non-list bodies yield nothing.
pub fn parse_directory(body: &Value) -> Vec<(i64, String)> {
    let Some(rows) = body.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let symbol = normalize_asset(row.get("symbol")?.as_str()?);
            if symbol.is_empty() {
                return None;
            }
            let id = row
                .get("market_index")
                .or_else(|| row.get("market_id"))
                .and_then(value_to_f64)?;
            Some((id as i64, symbol))
        })
        .collect()
}
