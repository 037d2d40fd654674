//! Field resolution for loosely-typed `market_stats` payloads
//!
//! Different Lighter stream versions spell the same field differently. Each
//! logical field has an ordered list of candidate keys; the first key that is
//! present and parses as a number wins.

use serde_json::{Map, Value};

use crate::state::SyntheticSides;

pub const BID_KEYS: &[&str] = &["best_bid", "bid", "bid_price", "bestBid", "bestBidPrice"];
pub const ASK_KEYS: &[&str] = &["best_ask", "ask", "ask_price", "bestAsk", "bestAskPrice"];
pub const MARK_KEYS: &[&str] = &["mark_price", "markPrice"];
pub const INDEX_KEYS: &[&str] = &["index_price", "indexPrice"];
pub const VOLUME_KEYS: &[&str] = &[
    "daily_quote_volume",
    "dailyQuoteVolume",
    "quote_volume_24h",
    "quoteVolume24h",
];

/// Normalized view of one `market_stats` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketUpdate {
    pub market_id: i64,
    pub symbol: Option<String>,
    pub index_price: Option<f64>,
    pub mark_price: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub daily_quote_volume: Option<f64>,
    /// Sides filled from mark/index price.
    pub synthetic_book: SyntheticSides,
}

/// Numbers and numeric strings; anything else is `None`.
pub fn value_to_f64(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    f.is_finite().then_some(f)
}

/// First candidate key that is present and numeric.
pub fn first_f64(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(value_to_f64))
}

/// Best bid/ask with the mark/index fallback.
///
/// When a side cannot be resolved it is filled with mark price (then index
/// price). Filled sides are reported so an explicit quote on the other side
/// stays usable.
pub fn pick_best_bid_ask(obj: &Map<String, Value>) -> (Option<f64>, Option<f64>, SyntheticSides) {
    let bid = first_f64(obj, BID_KEYS);
    let ask = first_f64(obj, ASK_KEYS);
    if bid.is_some() && ask.is_some() {
        return (bid, ask, SyntheticSides::default());
    }

    let Some(fallback) = first_f64(obj, MARK_KEYS).or_else(|| first_f64(obj, INDEX_KEYS)) else {
        return (bid, ask, SyntheticSides::default());
    };
    let filled = SyntheticSides {
        bid: bid.is_none(),
        ask: ask.is_none(),
    };
    (bid.or(Some(fallback)), ask.or(Some(fallback)), filled)
}

fn parse_market_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Normalize one entry of the `market_stats` map. `key` is the map key, used as
/// the market id when the entry does not carry `market_id`.
pub fn parse_market_entry(key: &str, value: &Value) -> Option<MarketUpdate> {
    let obj = value.as_object()?;
    let market_id = match obj.get("market_id").filter(|v| !v.is_null()) {
        Some(v) => parse_market_id(v)?,
        None => key.trim().parse::<i64>().ok()?,
    };

    let symbol = obj
        .get("symbol")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let (best_bid, best_ask, synthetic_book) = pick_best_bid_ask(obj);

    Some(MarketUpdate {
        market_id,
        symbol,
        index_price: first_f64(obj, INDEX_KEYS),
        mark_price: first_f64(obj, MARK_KEYS),
        best_bid,
        best_ask,
        daily_quote_volume: first_f64(obj, VOLUME_KEYS),
        synthetic_book,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_first_f64_respects_priority_and_skips_garbage() {
        let o = obj(json!({"bid": "n/a", "bid_price": "101.5", "bestBid": 99}));
        assert_eq!(first_f64(&o, BID_KEYS), Some(101.5));

        let o = obj(json!({"best_bid": null, "bestBidPrice": 7}));
        assert_eq!(first_f64(&o, BID_KEYS), Some(7.0));

        let o = obj(json!({"something": 1}));
        assert_eq!(first_f64(&o, BID_KEYS), None);
    }

    #[test]
    fn test_explicit_book_is_not_synthetic() {
        let o = obj(json!({"bestBid": "100", "bestAskPrice": 101.0, "mark_price": 55}));
        assert_eq!(
            pick_best_bid_ask(&o),
            (Some(100.0), Some(101.0), SyntheticSides::default())
        );
    }

    #[test]
    fn test_missing_book_falls_back_to_mark_then_index() {
        let both = SyntheticSides { bid: true, ask: true };
        let o = obj(json!({"markPrice": "250.5"}));
        assert_eq!(pick_best_bid_ask(&o), (Some(250.5), Some(250.5), both));

        let o = obj(json!({"index_price": 12}));
        assert_eq!(pick_best_bid_ask(&o), (Some(12.0), Some(12.0), both));

        let o = obj(json!({}));
        assert_eq!(pick_best_bid_ask(&o), (None, None, SyntheticSides::default()));
    }

    #[test]
    fn test_only_the_missing_side_is_synthetic() {
        let o = obj(json!({"best_bid": 9.0, "mark_price": 10.0}));
        let (bid, ask, filled) = pick_best_bid_ask(&o);
        assert_eq!((bid, ask), (Some(9.0), Some(10.0)));
        assert!(!filled.bid);
        assert!(filled.ask);

        let o = obj(json!({"best_ask": 11.0, "index_price": 10.0}));
        let (bid, ask, filled) = pick_best_bid_ask(&o);
        assert_eq!((bid, ask), (Some(10.0), Some(11.0)));
        assert!(filled.bid);
        assert!(!filled.ask);
    }

    #[test]
    fn test_parse_market_entry_uses_key_when_id_missing() {
        let entry = json!({
            "symbol": "ETH",
            "index_price": "3000.1",
            "mark_price": 3000.5,
            "best_bid": 3000.0,
            "best_ask": 3001.0,
            "quoteVolume24h": "123456.7"
        });
        let u = parse_market_entry("48", &entry).unwrap();
        assert_eq!(u.market_id, 48);
        assert_eq!(u.symbol.as_deref(), Some("ETH"));
        assert_eq!(u.index_price, Some(3000.1));
        assert_eq!(u.daily_quote_volume, Some(123456.7));
        assert!(!u.synthetic_book.any());
    }

    #[test]
    fn test_parse_market_entry_rejects_bad_ids() {
        assert!(parse_market_entry("abc", &json!({"symbol": "X"})).is_none());
        assert!(parse_market_entry("1", &json!({"market_id": "zz"})).is_none());
        assert!(parse_market_entry("1", &json!(["not", "a", "dict"])).is_none());

        let u = parse_market_entry("abc", &json!({"market_id": "5"})).unwrap();
        assert_eq!(u.market_id, 5);
        assert_eq!(u.symbol, None);
    }
}
