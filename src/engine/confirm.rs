//! Deeper-notional confirmation of active anomalies
//!
//! An anomaly found at the base notional may vanish at a larger size. For each
//! active anomaly outside its cooldown, both venues are asked for a buy price at
//! the confirm notional; the result is stored as `ConfirmInfo`.

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{secs, ConfirmConfig};
use crate::engine::spread::calc_bps;
use crate::feeds::var_quotes::QuoteProvider;
use crate::shutdown::StopSignal;
use crate::state::{ConfirmInfo, MarketStateStore};

/// Primary venue cost of buying `notional_usd` of `asset`.
#[async_trait::async_trait]
pub trait PrimaryLiquidityModel: Send + Sync {
    async fn vwap_buy_price(&self, asset: &str, notional_usd: f64) -> Option<f64>;
}

/// The stats stream carries no depth, so the best ask stands in for the VWAP.
/// An ask filled from mark/index price is not executable and yields `None`; a
/// synthetic bid does not matter here.
pub struct TopOfBookLiquidity {
    store: Arc<MarketStateStore>,
}

impl TopOfBookLiquidity {
    pub fn new(store: Arc<MarketStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl PrimaryLiquidityModel for TopOfBookLiquidity {
    async fn vwap_buy_price(&self, asset: &str, _notional_usd: f64) -> Option<f64> {
        self.store
            .read(asset, |m| {
                if m.book.synthetic.ask {
                    None
                } else {
                    m.book.best_ask.filter(|a| *a > 0.0)
                }
            })
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(ConfirmInfo),
    MissingPrimary,
    MissingSecondary,
}

impl fmt::Display for ConfirmOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(info) => write!(
                f,
                "confirmed: {:.4} usd at notional {}",
                info.executable_spread_usd, info.notional
            ),
            Self::MissingPrimary => write!(f, "missing_primary_vwap"),
            Self::MissingSecondary => write!(f, "missing_secondary_quote"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RetryState {
    failures: u32,
    next_attempt_at: i64,
}

pub struct ConfirmationExecutor {
    config: ConfirmConfig,
    store: Arc<MarketStateStore>,
    primary: Arc<dyn PrimaryLiquidityModel>,
    secondary: Arc<dyn QuoteProvider>,
    retry: Mutex<HashMap<String, RetryState>>,
}

impl ConfirmationExecutor {
    pub fn new(
        config: ConfirmConfig,
        store: Arc<MarketStateStore>,
        primary: Arc<dyn PrimaryLiquidityModel>,
        secondary: Arc<dyn QuoteProvider>,
    ) -> Self {
        Self {
            config,
            store,
            primary,
            secondary,
            retry: Mutex::new(HashMap::new()),
        }
    }

    /// Assets with an active anomaly whose cooldown (and retry wait) has passed.
    ///
    /// Retry state of assets whose anomaly has cleared is dropped, so a later
    /// anomaly starts with a clean failure count.
    pub fn candidates(&self, now_s: i64) -> Vec<String> {
        let cooldown = self.config.cooldown_secs;
        let mut active = Vec::new();
        let mut assets = self.store.filter_map(|m| {
            let c = &m.computed;
            if c.anomaly_active {
                active.push(m.id.clone());
            }
            let cooled = c.last_confirm_at.map_or(true, |t| now_s - t >= cooldown);
            (c.anomaly_active && cooled).then(|| m.id.clone())
        });
        let mut retry = self.retry.lock();
        retry.retain(|a, _| active.contains(a));
        assets.retain(|a| retry.get(a).map_or(true, |r| now_s >= r.next_attempt_at));
        assets.sort();
        assets
    }

    /// One confirmation pass. Candidates are checked concurrently.
    pub async fn run_once(&self, now_s: i64) -> Vec<(String, ConfirmOutcome)> {
        let notional = self.config.notional_usd;
        let checks = self.candidates(now_s).into_iter().map(|asset| async move {
            let (vwap, buy) = tokio::join!(
                self.primary.vwap_buy_price(&asset, notional),
                self.secondary.fetch_buy_price(&asset, notional),
            );
            let outcome = match (vwap, buy) {
                (None, _) => ConfirmOutcome::MissingPrimary,
                (_, None) => ConfirmOutcome::MissingSecondary,
                (Some(vwap), Some(buy)) => {
                    let usd = buy - vwap;
                    ConfirmOutcome::Confirmed(ConfirmInfo {
                        notional,
                        venue_a_price: vwap,
                        venue_b_price: buy,
                        executable_spread_usd: usd,
                        executable_spread_bps: calc_bps(usd, vwap),
                        observed_at_ms: Utc::now().timestamp_millis(),
                    })
                }
            };
            (asset, outcome)
        });
        let results = join_all(checks).await;

        for (asset, outcome) in &results {
            match outcome {
                ConfirmOutcome::Confirmed(info) => {
                    let info = *info;
                    self.store.mutate(asset, |m| {
                        m.computed.confirm_info = Some(info);
                        m.computed.last_confirm_at = Some(now_s);
                    });
                    self.retry.lock().remove(asset);
                    info!(
                        asset = %asset,
                        notional = info.notional,
                        spread_usd = info.executable_spread_usd,
                        spread_bps = ?info.executable_spread_bps,
                        "anomaly confirmed"
                    );
                }
                failed => {
                    let wait = self.record_failure(asset, now_s);
                    debug!(asset = %asset, outcome = %failed, retry_in_secs = wait, "confirmation skipped");
                }
            }
        }
        results
    }

    /// Returns the enforced wait in seconds (0 when retry backoff is off).
    fn record_failure(&self, asset: &str, now_s: i64) -> i64 {
        let base = self.config.retry_base_secs;
        if base <= 0 {
            return 0;
        }
        let mut retry = self.retry.lock();
        let state = retry.entry(asset.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);
        let exp = state.failures.saturating_sub(1).min(16);
        let wait = base
            .saturating_mul(1_i64 << exp)
            .min(self.config.retry_max_secs.max(base));
        state.next_attempt_at = now_s + wait;
        wait
    }

    pub async fn run(self: Arc<Self>, mut stop: StopSignal) {
        info!(
            notional = self.config.notional_usd,
            cooldown_secs = self.config.cooldown_secs,
            "confirmation executor starting"
        );
        let mut ticker = interval(secs(self.config.tick_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = ticker.tick() => {}
            }
            let now_s = Utc::now().timestamp();
            tokio::select! {
                _ = stop.stopped() => break,
                _ = self.run_once(now_s) => {}
            }
        }
        info!("confirmation executor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPrimary(Option<f64>);

    #[async_trait::async_trait]
    impl PrimaryLiquidityModel for FixedPrimary {
        async fn vwap_buy_price(&self, _asset: &str, _notional_usd: f64) -> Option<f64> {
            self.0
        }
    }

    struct CountingQuotes {
        price: Option<f64>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QuoteProvider for CountingQuotes {
        async fn fetch_buy_price(&self, _asset: &str, notional_usd: f64) -> Option<f64> {
            assert_eq!(notional_usd, 3000.0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price
        }
    }

    fn executor(
        config: ConfirmConfig,
        primary: Option<f64>,
        secondary: Option<f64>,
    ) -> (ConfirmationExecutor, Arc<MarketStateStore>, Arc<CountingQuotes>) {
        let store = MarketStateStore::new();
        let quotes = Arc::new(CountingQuotes {
            price: secondary,
            calls: AtomicUsize::new(0),
        });
        let exec = ConfirmationExecutor::new(
            config,
            store.clone(),
            Arc::new(FixedPrimary(primary)),
            quotes.clone(),
        );
        (exec, store, quotes)
    }

    fn activate(store: &MarketStateStore, asset: &str) {
        store.mutate(asset, |m| m.computed.anomaly_active = true);
    }

    #[tokio::test]
    async fn test_confirms_and_respects_cooldown() {
        let (exec, store, quotes) = executor(ConfirmConfig::default(), Some(100.0), Some(100.5));
        activate(&store, "ETH");
        store.mutate("BTC", |_| {});

        let results = exec.run_once(1_000).await;
        assert_eq!(results.len(), 1);
        let info = store.read("ETH", |m| m.computed.confirm_info).flatten().unwrap();
        assert_eq!(info.notional, 3000.0);
        assert_eq!(info.venue_a_price, 100.0);
        assert_eq!(info.venue_b_price, 100.5);
        assert!((info.executable_spread_usd - 0.5).abs() < 1e-12);
        assert!((info.executable_spread_bps.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(store.read("ETH", |m| m.computed.last_confirm_at).flatten(), Some(1_000));

        assert!(exec.run_once(1_029).await.is_empty());
        assert_eq!(exec.run_once(1_030).await.len(), 1);
        assert_eq!(quotes.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_quote_skips_without_cooldown() {
        let (exec, store, quotes) = executor(ConfirmConfig::default(), Some(100.0), None);
        activate(&store, "SOL");

        let results = exec.run_once(10).await;
        assert_eq!(results, vec![("SOL".to_string(), ConfirmOutcome::MissingSecondary)]);
        assert!(store.read("SOL", |m| m.computed.last_confirm_at).flatten().is_none());
        assert!(store.read("SOL", |m| m.computed.confirm_info).flatten().is_none());

        // No retry backoff by default: tried again on the next tick.
        exec.run_once(11).await;
        assert_eq!(quotes.calls.load(Ordering::SeqCst), 2);

        let (exec, store, _) = executor(ConfirmConfig::default(), None, Some(1.0));
        activate(&store, "SOL");
        let results = exec.run_once(10).await;
        assert_eq!(results[0].1, ConfirmOutcome::MissingPrimary);
    }

    #[tokio::test]
    async fn test_retry_backoff_doubles_and_resets() {
        let config = ConfirmConfig {
            retry_base_secs: 2,
            retry_max_secs: 5,
            ..ConfirmConfig::default()
        };
        let (exec, store, _) = executor(config, Some(100.0), None);
        activate(&store, "ETH");

        exec.run_once(0).await;
        assert!(exec.candidates(1).is_empty());
        assert_eq!(exec.candidates(2), vec!["ETH"]);

        exec.run_once(2).await;
        assert!(exec.candidates(5).is_empty());
        assert_eq!(exec.candidates(6), vec!["ETH"]);

        exec.run_once(6).await;
        assert!(exec.candidates(10).is_empty());
        assert_eq!(exec.candidates(11), vec!["ETH"]);
    }

    #[tokio::test]
    async fn test_top_of_book_liquidity() {
        let store = MarketStateStore::new();
        let model = TopOfBookLiquidity::new(store.clone());
        assert_eq!(model.vwap_buy_price("ETH", 3000.0).await, None);

        store.mutate("ETH", |m| m.book.best_ask = Some(3001.0));
        assert_eq!(model.vwap_buy_price("eth", 3000.0).await, Some(3001.0));

        store.mutate("ETH", |m| m.book.synthetic.bid = true);
        assert_eq!(model.vwap_buy_price("ETH", 3000.0).await, Some(3001.0));

        store.mutate("ETH", |m| m.book.synthetic.ask = true);
        assert_eq!(model.vwap_buy_price("ETH", 3000.0).await, None);
    }

    #[tokio::test]
    async fn test_retry_state_resets_when_anomaly_clears() {
        let config = ConfirmConfig {
            retry_base_secs: 2,
            retry_max_secs: 60,
            ..ConfirmConfig::default()
        };
        let (exec, store, _) = executor(config, Some(100.0), None);
        activate(&store, "ETH");

        exec.run_once(0).await;
        exec.run_once(2).await;
        assert!(exec.candidates(5).is_empty());

        store.mutate("ETH", |m| m.computed.anomaly_active = false);
        assert!(exec.candidates(5).is_empty());

        // Anomaly returns: no inherited wait, and the next failure waits the base.
        activate(&store, "ETH");
        assert_eq!(exec.candidates(5), vec!["ETH"]);
        exec.run_once(5).await;
        assert!(exec.candidates(6).is_empty());
        assert_eq!(exec.candidates(7), vec!["ETH"]);
    }
}
