//! End-to-end pipeline: batch quotes -> poller -> engine -> confirmation.

use arc_swap::ArcSwap;
use serde_json::json;
use std::sync::Arc;

use spreadwatch_backend::{
    api::{ingest_var_batch, ApiState},
    config::{ConfirmConfig, EngineConfig, QuotePollConfig},
    engine::{ConfirmOutcome, ConfirmationExecutor, SpreadEngine, SpreadMode, TopOfBookLiquidity},
    feeds::{BatchQuoteProvider, FeedHealth, QuoteProvider, SecondaryQuotePoller},
    series::TimeSeriesRecorder,
    shutdown::stop_channel,
    state::{BatchQuoteStore, MarketStateStore},
};

struct Pipeline {
    api: ApiState,
    poller: SecondaryQuotePoller,
    engine: SpreadEngine,
    confirmer: ConfirmationExecutor,
}

fn pipeline() -> Pipeline {
    let store = MarketStateStore::new();
    let quotes = Arc::new(BatchQuoteStore::new());
    let recorder = Arc::new(TimeSeriesRecorder::new(1_000));
    let provider: Arc<dyn QuoteProvider> = Arc::new(BatchQuoteProvider::new(quotes.clone()));

    let poller = SecondaryQuotePoller::new(
        QuotePollConfig {
            request_spacing_ms: 0,
            ..QuotePollConfig::default()
        },
        1500.0,
        3000.0,
        store.clone(),
        provider.clone(),
    );
    let engine = SpreadEngine::new(EngineConfig::default(), store.clone(), recorder.clone());
    let confirmer = ConfirmationExecutor::new(
        ConfirmConfig::default(),
        store.clone(),
        Arc::new(TopOfBookLiquidity::new(store.clone())),
        provider,
    );
    let api = ApiState::new(
        store,
        quotes,
        recorder,
        Arc::new(ArcSwap::from_pointee(FeedHealth::default())),
        2.0,
    );
    Pipeline {
        api,
        poller,
        engine,
        confirmer,
    }
}

fn submit(p: &Pipeline, ask_1500: f64, ask_3000: f64) {
    let payload = json!({"quotes": [
        {"base": "ETH", "notional_usd": 1500, "bid": ask_1500 - 0.2, "ask": ask_1500},
        {"base": "ETH", "notional_usd": 3000, "bid": ask_3000 - 0.2, "ask": ask_3000},
    ]});
    assert_eq!(ingest_var_batch(&p.api, &payload), 2);
}

#[tokio::test]
async fn test_persistent_dislocation_is_detected_and_confirmed() {
    let p = pipeline();
    p.api.store.mutate("ETH", |m| {
        m.market_id = Some(0);
        m.book.best_bid = Some(99.9);
        m.book.best_ask = Some(100.0);
        m.stats.mark_price = Some(100.0);
        m.stats.daily_quote_volume = Some(1e9);
    });
    let (_stop, mut signal) = stop_channel();

    // Flat baseline: secondary buy equals primary ask.
    submit(&p, 100.0, 100.1);
    assert_eq!(p.poller.poll_once(&mut signal).await, 1);
    for t in 0..30 {
        p.engine.tick(t * 1000);
    }
    let computed = p.api.store.get_or_create("ETH").computed;
    assert_eq!(computed.baseline_median_bps, Some(0.0));
    assert!(!computed.anomaly_active);
    assert!(p.confirmer.run_once(29).await.is_empty());

    // Secondary venue reprices 50 bps above the primary ask.
    submit(&p, 100.5, 100.6);
    p.poller.poll_once(&mut signal).await;
    for t in 30..36 {
        p.engine.tick(t * 1000);
        assert!(!p.api.store.get_or_create("ETH").computed.anomaly_active);
    }
    p.engine.tick(36_000);
    assert!(p.api.store.get_or_create("ETH").computed.anomaly_active);

    let results = p.confirmer.run_once(36).await;
    assert_eq!(results.len(), 1);
    let ConfirmOutcome::Confirmed(info) = &results[0].1 else {
        panic!("expected confirmation, got {:?}", results[0].1);
    };
    assert_eq!(info.venue_a_price, 100.0);
    assert_eq!(info.venue_b_price, 100.6);
    assert!((info.executable_spread_bps.unwrap() - 60.0).abs() < 1e-6);

    // Cooldown: nothing new within 30 s.
    assert!(p.confirmer.run_once(50).await.is_empty());

    let engine_series = p
        .api
        .recorder
        .query("ETH", SpreadMode::VarBuyMinusLighterAsk, 0);
    assert_eq!(engine_series.len(), 37);
    assert_eq!(
        p.api
            .recorder
            .query("ETH", SpreadMode::LighterAskMinusVarBuy, 0)
            .len(),
        4
    );
}

#[tokio::test]
async fn test_off_mark_quotes_never_reach_the_engine() {
    let p = pipeline();
    p.api.store.mutate("BTC", |m| {
        m.book.best_ask = Some(60_000.0);
        m.stats.mark_price = Some(60_000.0);
        m.stats.daily_quote_volume = Some(1e9);
    });

    let payload = json!({"quotes": [
        {"base": "BTC", "notional_usd": 1500, "bid": 70_000.0, "ask": 70_010.0}
    ]});
    assert_eq!(ingest_var_batch(&p.api, &payload), 0);
    assert_eq!(p.api.quotes.active_bases(), vec!["BTC"]);

    let (_stop, mut signal) = stop_channel();
    p.poller.poll_once(&mut signal).await;
    let summary = p.engine.tick(0);
    assert_eq!(summary.with_spread, 0);
    assert!(p
        .api
        .store
        .get_or_create("BTC")
        .secondary_quote
        .buy_at_base_notional
        .is_none());
}
