//! Per-asset market record
//!
//! One `Market` exists per base asset. Field groups map to the writers that own
//! them: the primary feed writes `book`/`stats`, the quote poller writes
//! `secondary_quote`, the engine writes `history`/`computed`, and the
//! confirmation executor writes `computed.confirm_info`.

use serde::Serialize;
use std::collections::VecDeque;

/// Last known top of book from the primary venue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BookTop {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    /// Sides filled from mark/index price because the payload carried no
    /// explicit quote for them.
    pub synthetic: SyntheticSides,
}

/// Which sides of a [`BookTop`] are mark/index fallbacks rather than quotes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyntheticSides {
    pub bid: bool,
    pub ask: bool,
}

impl SyntheticSides {
    pub fn any(self) -> bool {
        self.bid || self.ask
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarketStats {
    pub daily_quote_volume: Option<f64>,
    pub mark_price: Option<f64>,
    pub index_price: Option<f64>,
}

/// Secondary venue buy prices at the two fixed notionals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SecondaryQuote {
    pub buy_at_base_notional: Option<f64>,
    pub buy_at_confirm_notional: Option<f64>,
    pub observed_at_ms: i64,
}

/// Snapshot of the last successful deeper-notional check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfirmInfo {
    pub notional: f64,
    /// Primary venue VWAP buy price at `notional`.
    pub venue_a_price: f64,
    /// Secondary venue buy price at `notional`.
    pub venue_b_price: f64,
    pub executable_spread_usd: f64,
    pub executable_spread_bps: Option<f64>,
    pub observed_at_ms: i64,
}

/// Engine output for one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Computed {
    pub spread_usd: Option<f64>,
    pub spread_bps: Option<f64>,
    pub baseline_median_bps: Option<f64>,
    pub baseline_iqr_bps: Option<f64>,
    pub deviation_bps: Option<f64>,
    pub anomaly_active: bool,
    pub anomaly_started_at: Option<i64>,
    pub last_confirm_at: Option<i64>,
    pub confirm_info: Option<ConfirmInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadSample {
    pub ts: i64,
    pub bps: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Market {
    pub id: String,
    pub market_id: Option<i64>,
    pub book: BookTop,
    pub stats: MarketStats,
    pub secondary_quote: SecondaryQuote,
    /// Spread history in bps, oldest first. Evicted by age, never by count.
    #[serde(skip)]
    pub history: VecDeque<SpreadSample>,
    pub computed: Computed,
    pub updated_at_ms: Option<i64>,
}

impl Market {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Mark price, falling back to index price.
    pub fn reference_price(&self) -> Option<f64> {
        self.stats.mark_price.or(self.stats.index_price)
    }

    /// Primary mid, or mark/index when the book is one-sided.
    pub fn primary_mid(&self) -> Option<f64> {
        match (self.book.best_bid, self.book.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => self.reference_price(),
        }
    }
}

/// Normalize an asset id for keying: trimmed and uppercase.
pub fn normalize_asset(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
