//! In-memory spread time series for charting
//!
//! One fixed-capacity ring per `(asset, mode)`. Pushing into a full ring evicts
//! the oldest point; queries filter by timestamp.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::engine::spread::SpreadMode;
use crate::state::normalize_asset;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub t_ms: i64,
    pub usd: f64,
    pub bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    Bps,
    Usd,
}

impl Metric {
    /// Anything but `usd` reads as bps.
    pub fn parse_lossy(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("usd") {
            Self::Usd
        } else {
            Self::Bps
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bps => "bps",
            Self::Usd => "usd",
        }
    }

    pub fn value(&self, p: &SeriesPoint) -> f64 {
        match self {
            Self::Bps => p.bps,
            Self::Usd => p.usd,
        }
    }
}

#[derive(Debug)]
pub struct TimeSeriesRecorder {
    capacity: usize,
    series: RwLock<HashMap<(String, SpreadMode), VecDeque<SeriesPoint>>>,
}

impl TimeSeriesRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-finite values are dropped.
    pub fn push(&self, asset: &str, mode: SpreadMode, point: SeriesPoint) {
        if !(point.usd.is_finite() && point.bps.is_finite()) {
            return;
        }
        let asset = normalize_asset(asset);
        if asset.is_empty() {
            return;
        }
        let mut series = self.series.write();
        let ring = series
            .entry((asset, mode))
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(1024)));
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(point);
    }

    /// Points with `t_ms >= since_ms`, oldest first.
    pub fn query(&self, asset: &str, mode: SpreadMode, since_ms: i64) -> Vec<SeriesPoint> {
        let key = (normalize_asset(asset), mode);
        self.series
            .read()
            .get(&key)
            .map(|ring| ring.iter().filter(|p| p.t_ms >= since_ms).copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, asset: &str, mode: SpreadMode) -> usize {
        self.series
            .read()
            .get(&(normalize_asset(asset), mode))
            .map_or(0, VecDeque::len)
    }

    /// Every asset with at least one series, sorted.
    pub fn bases(&self) -> Vec<String> {
        let series = self.series.read();
        let bases: BTreeSet<&String> = series.keys().map(|(base, _)| base).collect();
        bases.into_iter().cloned().collect()
    }
}

/// `5m`, `2h`, or plain seconds. Unparseable input yields `None`.
pub fn parse_window_secs(raw: &str) -> Option<i64> {
    let w = raw.trim().to_ascii_lowercase();
    let (num, scale) = if let Some(n) = w.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = w.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = w.strip_suffix('s') {
        (n, 1.0)
    } else {
        (w.as_str(), 1.0)
    };
    let v: f64 = num.trim().parse().ok()?;
    (v.is_finite() && v >= 0.0).then(|| (v * scale) as i64)
}
