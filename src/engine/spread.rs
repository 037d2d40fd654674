//! Cross-venue spread definitions

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::state::{normalize_asset, BatchQuoteStore, MarketStateStore};

/// Which prices are compared. The first three are computed from batch quotes;
/// `VarBuyMinusLighterAsk` is the engine spread.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SpreadMode {
    #[default]
    LighterBidMinusVarSell,
    LighterAskMinusVarBuy,
    LighterMidMinusVarMid,
    VarBuyMinusLighterAsk,
}

impl SpreadMode {
    pub const ALL: [SpreadMode; 4] = [
        SpreadMode::LighterBidMinusVarSell,
        SpreadMode::LighterAskMinusVarBuy,
        SpreadMode::LighterMidMinusVarMid,
        SpreadMode::VarBuyMinusLighterAsk,
    ];

    /// Modes recorded on every stored batch quote.
    pub const BATCH_SERIES: [SpreadMode; 2] = [
        SpreadMode::LighterBidMinusVarSell,
        SpreadMode::LighterAskMinusVarBuy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LighterBidMinusVarSell => "lighter_bid_minus_var_sell",
            Self::LighterAskMinusVarBuy => "lighter_ask_minus_var_buy",
            Self::LighterMidMinusVarMid => "lighter_mid_minus_var_mid",
            Self::VarBuyMinusLighterAsk => "var_buy_minus_lighter_ask",
        }
    }

    /// Unknown names fall back to mid-vs-mid.
    pub fn parse_lossy(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::LighterMidMinusVarMid)
    }
}

impl fmt::Display for SpreadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpreadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown spread mode: {}", s))
    }
}

/// Spread in bps of `reference`; undefined for a non-positive reference.
pub fn calc_bps(spread_usd: f64, reference: f64) -> Option<f64> {
    (reference.is_finite() && reference > 0.0).then(|| spread_usd / reference * 1e4)
}

/// Both sides of one spread computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadView {
    pub base: String,
    pub notional: f64,
    pub mode: SpreadMode,
    pub lighter_bid: Option<f64>,
    pub lighter_ask: Option<f64>,
    pub lighter_mid: Option<f64>,
    pub var_bid: Option<f64>,
    pub var_ask: Option<f64>,
    pub var_mid: Option<f64>,
    pub spread_usd: Option<f64>,
    pub spread_bps: Option<f64>,
}

/// Spread between the primary book and the closest batch quote for `base`.
pub fn compute_spread(
    store: &MarketStateStore,
    quotes: &BatchQuoteStore,
    base: &str,
    notional: f64,
    mode: SpreadMode,
) -> SpreadView {
    let base = normalize_asset(base);
    let primary = store.primary_price(&base);
    let lighter_mid = match (primary.bid, primary.ask) {
        (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
        _ => primary.mark,
    };

    let quote = quotes.get(&base, notional);
    let var_bid = quote.as_ref().map(|q| q.bid);
    let var_ask = quote.as_ref().map(|q| q.ask);
    let var_mid = quote.as_ref().map(|q| q.mid_price());

    let (pair, reference) = match mode {
        SpreadMode::LighterBidMinusVarSell => (primary.bid.zip(var_bid), var_bid),
        SpreadMode::LighterAskMinusVarBuy => (primary.ask.zip(var_ask), var_ask),
        SpreadMode::LighterMidMinusVarMid => (lighter_mid.zip(var_mid), var_mid),
        SpreadMode::VarBuyMinusLighterAsk => (var_ask.zip(primary.ask), primary.ask),
    };
    let spread_usd = pair.map(|(a, b)| a - b);
    let spread_bps = spread_usd
        .zip(reference)
        .and_then(|(usd, reference)| calc_bps(usd, reference));

    SpreadView {
        base,
        notional,
        mode,
        lighter_bid: primary.bid,
        lighter_ask: primary.ask,
        lighter_mid,
        var_bid,
        var_ask,
        var_mid,
        spread_usd,
        spread_bps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PrimaryPrice, RawBatchQuote};

    fn setup() -> (std::sync::Arc<MarketStateStore>, BatchQuoteStore) {
        let store = MarketStateStore::new();
        store.mutate("ETH", |m| {
            m.book.best_bid = Some(3000.0);
            m.book.best_ask = Some(3002.0);
            m.stats.mark_price = Some(3001.0);
        });
        let quotes = BatchQuoteStore::new();
        let raw = RawBatchQuote {
            base: Some("ETH".to_string()),
            notional_usd: Some(1500.0),
            bid: Some(2990.0),
            ask: Some(3010.0),
            ..Default::default()
        };
        quotes.ingest(&raw, |_| PrimaryPrice::default());
        (store, quotes)
    }

    #[test]
    fn test_mode_names_round_trip() {
        for mode in SpreadMode::ALL {
            assert_eq!(mode.as_str().parse::<SpreadMode>(), Ok(mode));
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
        assert!("bogus".parse::<SpreadMode>().is_err());
        assert_eq!(SpreadMode::parse_lossy("bogus"), SpreadMode::LighterMidMinusVarMid);
    }

    #[test]
    fn test_calc_bps() {
        assert_eq!(calc_bps(1.0, 100.0), Some(100.0));
        assert_eq!(calc_bps(1.0, 0.0), None);
        assert_eq!(calc_bps(1.0, -5.0), None);
    }

    #[test]
    fn test_compute_spread_modes() {
        let (store, quotes) = setup();

        let bid = compute_spread(&store, &quotes, "eth", 1500.0, SpreadMode::LighterBidMinusVarSell);
        assert_eq!(bid.spread_usd, Some(10.0));
        assert!((bid.spread_bps.unwrap() - 10.0 / 2990.0 * 1e4).abs() < 1e-9);

        let ask = compute_spread(&store, &quotes, "ETH", 1500.0, SpreadMode::LighterAskMinusVarBuy);
        assert_eq!(ask.spread_usd, Some(-8.0));

        let mid = compute_spread(&store, &quotes, "ETH", 1500.0, SpreadMode::LighterMidMinusVarMid);
        assert_eq!(mid.lighter_mid, Some(3001.0));
        assert_eq!(mid.var_mid, Some(3000.0));
        assert_eq!(mid.spread_usd, Some(1.0));

        let engine = compute_spread(&store, &quotes, "ETH", 1500.0, SpreadMode::VarBuyMinusLighterAsk);
        assert_eq!(engine.spread_usd, Some(8.0));
        assert!((engine.spread_bps.unwrap() - 8.0 / 3002.0 * 1e4).abs() < 1e-9);
    }

    #[test]
    fn test_compute_spread_missing_side() {
        let (store, quotes) = setup();
        let v = compute_spread(&store, &quotes, "BTC", 1500.0, SpreadMode::LighterBidMinusVarSell);
        assert_eq!(v.spread_usd, None);
        assert_eq!(v.spread_bps, None);
        assert_eq!(v.var_bid, None);

        store.mutate("SOL", |m| m.stats.mark_price = Some(150.0));
        let v = compute_spread(&store, &quotes, "SOL", 1500.0, SpreadMode::LighterMidMinusVarMid);
        assert_eq!(v.lighter_mid, Some(150.0));
        assert_eq!(v.spread_usd, None);
    }
}
