//! Secondary venue (Variational) batch quotes
//!
//! An external submitter posts indicative quotes in batches. Quotes are keyed by
//! `(BASE, notional rounded to whole dollars)` so `1500` and `1499.6` land on the
//! same slot. Obviously broken quotes are dropped before they reach the store.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::market::normalize_asset;
use super::store::PrimaryPrice;

/// Maximum allowed relative distance between a quote mid and the primary mark.
pub const MAX_MARK_DEVIATION: f64 = 0.05;

/// One quote as submitted. Numeric fields accept numbers or numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBatchQuote {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default, alias = "notional", deserialize_with = "lenient_f64")]
    pub notional_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mid: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub qty_used: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchQuote {
    pub base: String,
    pub notional_usd: i64,
    pub bid: f64,
    pub ask: f64,
    pub mid: Option<f64>,
    pub qty_used: Option<f64>,
    pub received_at_ms: i64,
}

impl BatchQuote {
    /// Submitted mid, else the bid/ask midpoint.
    pub fn mid_price(&self) -> f64 {
        self.mid.unwrap_or((self.bid + self.ask) / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyBase,
    MissingBidAsk,
    OffMark,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBase => write!(f, "empty_base"),
            Self::MissingBidAsk => write!(f, "missing_bid_ask"),
            Self::OffMark => write!(f, "off_mark"),
        }
    }
}

/// Result of ingesting one record.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Stored(BatchQuote),
    Rejected(RejectReason),
}

#[derive(Debug, Default)]
pub struct BatchQuoteStore {
    quotes: RwLock<HashMap<(String, i64), BatchQuote>>,
    active_bases: RwLock<BTreeSet<String>>,
}

impl BatchQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and upsert one quote. `primary` supplies the anti-garbage
    /// reference price for the quote's base.
    pub fn ingest(
        &self,
        raw: &RawBatchQuote,
        primary: impl FnOnce(&str) -> PrimaryPrice,
    ) -> BatchOutcome {
        let base = normalize_asset(raw.base.as_deref().unwrap_or(""));
        if base.is_empty() {
            return BatchOutcome::Rejected(RejectReason::EmptyBase);
        }
        let notional = notional_key(raw.notional_usd);

        let (bid, ask) = match (raw.bid, raw.ask) {
            (Some(b), Some(a)) if b > a => (a, b),
            (Some(b), Some(a)) => (b, a),
            _ => return BatchOutcome::Rejected(RejectReason::MissingBidAsk),
        };

        let price = primary(&base);
        let reference = price.mark.or(price.bid).or(price.ask).filter(|r| *r > 0.0);
        if let Some(reference) = reference {
            let mid = (bid + ask) / 2.0;
            if ((mid - reference) / reference).abs() > MAX_MARK_DEVIATION {
                self.active_bases.write().insert(base);
                return BatchOutcome::Rejected(RejectReason::OffMark);
            }
        }

        let quote = BatchQuote {
            base: base.clone(),
            notional_usd: notional,
            bid,
            ask,
            mid: raw.mid,
            qty_used: raw.qty_used,
            received_at_ms: Utc::now().timestamp_millis(),
        };
        self.quotes
            .write()
            .insert((base.clone(), notional), quote.clone());
        self.active_bases.write().insert(base);
        BatchOutcome::Stored(quote)
    }

    /// Exact `(base, notional)` match, else the nearest notional for the base.
    pub fn get(&self, base: &str, notional_usd: f64) -> Option<BatchQuote> {
        let base = normalize_asset(base);
        if base.is_empty() {
            return None;
        }
        let key = notional_key(Some(notional_usd));
        let quotes = self.quotes.read();
        if let Some(exact) = quotes.get(&(base.clone(), key)) {
            return Some(exact.clone());
        }
        quotes
            .iter()
            .filter(|((b, _), _)| *b == base)
            .min_by_key(|((_, n), _)| (n - key).abs())
            .map(|(_, q)| q.clone())
    }

    pub fn active_bases(&self) -> Vec<String> {
        self.active_bases.read().iter().cloned().collect()
    }

    pub fn key_count(&self) -> usize {
        self.quotes.read().len()
    }
}

/// Round a notional to whole dollars; missing values map to 0.
pub fn notional_key(notional: Option<f64>) -> i64 {
    notional
        .filter(|n| n.is_finite())
        .map(|n| n.round() as i64)
        .unwrap_or(0)
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(crate::feeds::fields::value_to_f64))
}
