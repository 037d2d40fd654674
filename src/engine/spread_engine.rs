//! Rolling spread baselines and anomaly detection
//!
//! Every tick, for each market:
//! 1. spread = secondary buy at base notional - primary best ask (bps of ask)
//! 2. append to the age-bounded history and trim
//! 3. baseline = median / IQR of history (needs `MIN_BASELINE_SAMPLES`)
//! 4. anomaly when |spread - median| >= max(min_delta, 2 * IQR) has held for
//!    `persist_secs`; cleared the first tick it does not hold
//!
//! All of it runs under the market's own lock, so readers never observe a
//! half-updated record.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{secs, EngineConfig};
use crate::engine::spread::{calc_bps, SpreadMode};
use crate::series::{SeriesPoint, TimeSeriesRecorder};
use crate::shutdown::StopSignal;
use crate::state::{Market, MarketStateStore, SpreadSample};
use crate::stats::median_iqr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyTransition {
    Raised,
    Cleared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepResult {
    /// `(usd, bps)` when a spread was defined this tick.
    pub spread: Option<(f64, f64)>,
    pub transition: Option<AnomalyTransition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub markets: usize,
    pub with_spread: usize,
    pub active: usize,
}

/// Drop samples older than `window_secs` relative to `now_s`.
pub fn trim_history(market: &mut Market, now_s: i64, window_secs: i64) {
    while market
        .history
        .front()
        .is_some_and(|s| now_s - s.ts > window_secs)
    {
        market.history.pop_front();
    }
}

/// One engine step for one market.
pub fn step(market: &mut Market, now_s: i64, cfg: &EngineConfig) -> StepResult {
    let ask = market.book.best_ask.filter(|a| *a > 0.0);
    let buy = market.secondary_quote.buy_at_base_notional;

    let spread = match (buy, ask) {
        (Some(buy), Some(ask)) => {
            let usd = buy - ask;
            calc_bps(usd, ask).map(|bps| (usd, bps))
        }
        _ => None,
    };

    let computed = &mut market.computed;
    computed.spread_usd = spread.map(|(usd, _)| usd);
    computed.spread_bps = spread.map(|(_, bps)| bps);

    if let Some((_, bps)) = spread {
        market.history.push_back(SpreadSample { ts: now_s, bps });
    }
    trim_history(market, now_s, cfg.baseline_window_secs);

    let (median, iqr) = median_iqr(market.history.iter().map(|s| s.bps));
    let computed = &mut market.computed;
    computed.baseline_median_bps = median;
    computed.baseline_iqr_bps = iqr;

    let mut result = StepResult {
        spread,
        transition: None,
    };

    let (Some((_, bps)), Some(median), Some(iqr)) = (spread, median, iqr) else {
        computed.deviation_bps = None;
        return result;
    };

    let deviation = bps - median;
    computed.deviation_bps = Some(deviation);
    let threshold = cfg.min_delta_bps.max(2.0 * iqr);

    if deviation.abs() >= threshold {
        let started = *computed.anomaly_started_at.get_or_insert(now_s);
        if !computed.anomaly_active && now_s - started >= cfg.persist_secs {
            computed.anomaly_active = true;
            result.transition = Some(AnomalyTransition::Raised);
        }
    } else {
        if computed.anomaly_active {
            result.transition = Some(AnomalyTransition::Cleared);
        }
        computed.anomaly_active = false;
        computed.anomaly_started_at = None;
    }
    result
}

pub struct SpreadEngine {
    config: EngineConfig,
    store: Arc<MarketStateStore>,
    recorder: Arc<TimeSeriesRecorder>,
}

impl SpreadEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<MarketStateStore>,
        recorder: Arc<TimeSeriesRecorder>,
    ) -> Self {
        Self {
            config,
            store,
            recorder,
        }
    }

    /// Step every known market at `now_ms`.
    pub fn tick(&self, now_ms: i64) -> TickSummary {
        let now_s = now_ms.div_euclid(1000);
        let mut summary = TickSummary::default();

        for asset in self.store.asset_ids() {
            let (result, active, deviation) = self.store.mutate(&asset, |m| {
                let r = step(m, now_s, &self.config);
                (r, m.computed.anomaly_active, m.computed.deviation_bps)
            });

            summary.markets += 1;
            if active {
                summary.active += 1;
            }
            if let Some((usd, bps)) = result.spread {
                summary.with_spread += 1;
                self.recorder.push(
                    &asset,
                    SpreadMode::VarBuyMinusLighterAsk,
                    SeriesPoint { t_ms: now_ms, usd, bps },
                );
            }
            match result.transition {
                Some(AnomalyTransition::Raised) => {
                    info!(asset = %asset, deviation_bps = ?deviation, "spread anomaly raised");
                }
                Some(AnomalyTransition::Cleared) => {
                    info!(asset = %asset, "spread anomaly cleared");
                }
                None => {}
            }
        }
        summary
    }

    pub async fn run(self: Arc<Self>, mut stop: StopSignal) {
        info!(
            window_secs = self.config.baseline_window_secs,
            persist_secs = self.config.persist_secs,
            min_delta_bps = self.config.min_delta_bps,
            "spread engine starting"
        );
        let mut ticker = interval(secs(self.config.tick_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = ticker.tick() => {
                    let summary = self.tick(Utc::now().timestamp_millis());
                    debug!(
                        markets = summary.markets,
                        with_spread = summary.with_spread,
                        active = summary.active,
                        "engine tick"
                    );
                }
            }
        }
        info!("spread engine stopped");
    }
}
