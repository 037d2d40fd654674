//! Concurrent per-asset market state
//!
//! The map lock is only held to look up or insert a record; every update then
//! runs under that record's own mutex, so writers on unrelated assets never
//! wait on each other.

use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};

use super::market::{normalize_asset, Market};

/// Primary venue reference prices for one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrimaryPrice {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub mark: Option<f64>,
}

/// Row for volume-ranked listings.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRow {
    pub base: String,
    pub market_id: Option<i64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mark_price: Option<f64>,
    pub daily_quote_volume: Option<f64>,
}

#[derive(Debug, Default)]
pub struct MarketStateStore {
    markets: RwLock<HashMap<String, Arc<Mutex<Market>>>>,
}

impl MarketStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handle(&self, id: &str) -> Arc<Mutex<Market>> {
        if let Some(existing) = self.markets.read().get(id) {
            return existing.clone();
        }
        self.markets
            .write()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Market::new(id))))
            .clone()
    }

    fn existing(&self, id: &str) -> Option<Arc<Mutex<Market>>> {
        self.markets.read().get(id).cloned()
    }

    /// Snapshot of the market, creating an empty record on first call.
    pub fn get_or_create(&self, asset: &str) -> Market {
        let id = normalize_asset(asset);
        let handle = self.handle(&id);
        let snapshot = handle.lock().clone();
        snapshot
    }

    /// Apply `f` atomically to one market record, creating it if needed.
    pub fn mutate<R>(&self, asset: &str, f: impl FnOnce(&mut Market) -> R) -> R {
        let id = normalize_asset(asset);
        let handle = self.handle(&id);
        let mut market = handle.lock();
        f(&mut market)
    }

    /// Read one market without creating it.
    pub fn read<R>(&self, asset: &str, f: impl FnOnce(&Market) -> R) -> Option<R> {
        let handle = self.existing(&normalize_asset(asset))?;
        let market = handle.lock();
        Some(f(&market))
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.markets.read().keys().cloned().collect()
    }

    /// Cloned snapshot of every market. Records are locked one at a time.
    pub fn snapshot_all(&self) -> Vec<Market> {
        let handles: Vec<Arc<Mutex<Market>>> = self.markets.read().values().cloned().collect();
        handles.iter().map(|h| h.lock().clone()).collect()
    }

    /// Collect `f(market)` for every market where it returns `Some`.
    pub fn filter_map<R>(&self, mut f: impl FnMut(&Market) -> Option<R>) -> Vec<R> {
        let handles: Vec<Arc<Mutex<Market>>> = self.markets.read().values().cloned().collect();
        handles.iter().filter_map(|h| f(&h.lock())).collect()
    }

    pub fn len(&self) -> usize {
        self.markets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn primary_price(&self, asset: &str) -> PrimaryPrice {
        self.read(asset, |m| PrimaryPrice {
            bid: m.book.best_bid,
            ask: m.book.best_ask,
            mark: m.reference_price(),
        })
        .unwrap_or_default()
    }

    /// Markets ranked by daily quote volume (descending, missing volume last),
    /// then by market id.
    pub fn volume_ranked(&self, top_n: usize) -> Vec<VolumeRow> {
        let mut rows = self.filter_map(|m| {
            Some(VolumeRow {
                base: m.id.clone(),
                market_id: m.market_id,
                best_bid: m.book.best_bid,
                best_ask: m.book.best_ask,
                mark_price: m.reference_price(),
                daily_quote_volume: m.stats.daily_quote_volume,
            })
        });

        rows.sort_by(|a, b| {
            let va = a.daily_quote_volume.unwrap_or(-1.0);
            let vb = b.daily_quote_volume.unwrap_or(-1.0);
            vb.partial_cmp(&va)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.market_id.unwrap_or(0).cmp(&b.market_id.unwrap_or(0)))
        });
        rows.truncate(top_n);
        rows
    }

    /// Bases with a known volume, highest first. `crypto_only` skips
    /// FX-looking pairs.
    pub fn top_bases_by_volume(&self, top_n: usize, crypto_only: bool) -> Vec<String> {
        self.volume_ranked(usize::MAX)
            .into_iter()
            .filter(|r| r.daily_quote_volume.is_some())
            .filter(|r| !crypto_only || is_crypto_symbol(&r.base))
            .take(top_n)
            .map(|r| r.base)
            .collect()
    }
}

/// Crude filter for FX pairs such as `USDCHF` or `EURUSD`.
pub fn is_crypto_symbol(base: &str) -> bool {
    let b = base.to_ascii_uppercase();
    !(b.len() == 6 && (b.starts_with("USD") || b.ends_with("USD")))
}
