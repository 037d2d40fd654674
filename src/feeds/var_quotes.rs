//! Secondary venue (Variational) quote capability
//!
//! The engine never talks to the secondary venue directly. It asks a
//! [`QuoteProvider`] for a buy price at a given notional; the shipped provider
//! reads from the batch quote store that external submitters fill.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::config::{secs, QuotePollConfig};
use crate::shutdown::StopSignal;
use crate::state::{BatchQuoteStore, MarketStateStore};

/// Indicative buy price for `notional_usd` of `asset`. Implementations must not
/// error: anything that goes wrong is `None` and the caller skips the tick.
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_buy_price(&self, asset: &str, notional_usd: f64) -> Option<f64>;
}

/// Serves the ask of the closest batch quote for the asset.
pub struct BatchQuoteProvider {
    quotes: Arc<BatchQuoteStore>,
    max_age_ms: Option<i64>,
}

impl BatchQuoteProvider {
    pub fn new(quotes: Arc<BatchQuoteStore>) -> Self {
        Self {
            quotes,
            max_age_ms: None,
        }
    }

    /// Ignore quotes older than `max_age_secs`. Zero or negative disables the check.
    pub fn with_max_age_secs(mut self, max_age_secs: i64) -> Self {
        self.max_age_ms = (max_age_secs > 0).then_some(max_age_secs * 1000);
        self
    }
}

#[async_trait::async_trait]
impl QuoteProvider for BatchQuoteProvider {
    async fn fetch_buy_price(&self, asset: &str, notional_usd: f64) -> Option<f64> {
        let quote = self.quotes.get(asset, notional_usd)?;
        if let Some(max_age) = self.max_age_ms {
            if Utc::now().timestamp_millis() - quote.received_at_ms > max_age {
                return None;
            }
        }
        (quote.ask.is_finite() && quote.ask > 0.0).then_some(quote.ask)
    }
}

/// Refreshes `Market.secondary_quote` for the most liquid primary markets.
pub struct SecondaryQuotePoller {
    config: QuotePollConfig,
    base_notional_usd: f64,
    confirm_notional_usd: f64,
    store: Arc<MarketStateStore>,
    provider: Arc<dyn QuoteProvider>,
}

impl SecondaryQuotePoller {
    pub fn new(
        config: QuotePollConfig,
        base_notional_usd: f64,
        confirm_notional_usd: f64,
        store: Arc<MarketStateStore>,
        provider: Arc<dyn QuoteProvider>,
    ) -> Self {
        Self {
            config,
            base_notional_usd,
            confirm_notional_usd,
            store,
            provider,
        }
    }

    /// One pass over the current top-N bases. Returns how many bases were
    /// polled; stops early (returning what it did) when `stop` fires.
    pub async fn poll_once(&self, stop: &mut StopSignal) -> usize {
        let bases = self.store.top_bases_by_volume(self.config.top_n, true);
        let spacing = Duration::from_millis(self.config.request_spacing_ms);
        let mut polled = 0;

        for base in bases {
            if stop.is_stopped() {
                break;
            }
            let at_base = self
                .provider
                .fetch_buy_price(&base, self.base_notional_usd)
                .await;
            let at_confirm = self
                .provider
                .fetch_buy_price(&base, self.confirm_notional_usd)
                .await;

            let now_ms = Utc::now().timestamp_millis();
            self.store.mutate(&base, |m| {
                m.secondary_quote.buy_at_base_notional = at_base;
                m.secondary_quote.buy_at_confirm_notional = at_confirm;
                m.secondary_quote.observed_at_ms = now_ms;
            });
            debug!(base = %base, ?at_base, ?at_confirm, "secondary quote polled");
            polled += 1;

            if !spacing.is_zero() && !stop.sleep(spacing).await {
                break;
            }
        }
        polled
    }

    pub async fn run(self: Arc<Self>, mut stop: StopSignal) {
        info!(
            top_n = self.config.top_n,
            interval_secs = self.config.poll_interval_secs,
            "secondary quote poller starting"
        );
        let idle = Duration::from_secs(1);
        let interval = secs(self.config.poll_interval_secs);

        while !stop.is_stopped() {
            let polled = self.poll_once(&mut stop).await;
            let wait = if polled == 0 { idle } else { interval };
            if !stop.sleep(wait).await {
                break;
            }
        }
        info!("secondary quote poller stopped");
    }
}
