//! Lighter `market_stats/all` WebSocket ingestor
//!
//! Keeps one subscription alive for the lifetime of the process and writes every
//! market update into the [`MarketStateStore`]. Any failure (socket error,
//! close frame, connect timeout, silent stream) is recorded in the health
//! snapshot and followed by a reconnect with capped exponential backoff.

use arc_swap::ArcSwap;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
};
use tracing::{debug, info, warn};

use crate::config::{secs, FeedConfig};
use crate::feeds::backoff::ReconnectBackoff;
use crate::feeds::fields::{parse_market_entry, MarketUpdate};
use crate::feeds::lighter_markets::MarketDirectory;
use crate::shutdown::StopSignal;
use crate::state::{normalize_asset, BookTop, MarketStateStore};

pub const SUBSCRIBE_CHANNEL: &str = "market_stats/all";

pub fn subscribe_payload() -> String {
    serde_json::json!({"type": "subscribe", "channel": SUBSCRIBE_CHANNEL}).to_string()
}

/// Why a connection ended. The `Display` form is what lands in `last_error`.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedError {
    Connect(String),
    ConnectTimeout(Duration),
    Socket(String),
    StreamEnded,
    Closed(Option<String>),
    Stale(Duration),
    MalformedHandshake,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect_failed: {}", e),
            Self::ConnectTimeout(d) => write!(f, "connect_timeout: {:.1}s", d.as_secs_f64()),
            Self::Socket(e) => write!(f, "socket_error: {}", e),
            Self::StreamEnded => write!(f, "stream_ended"),
            Self::Closed(Some(reason)) if !reason.is_empty() => write!(f, "closed: {}", reason),
            Self::Closed(_) => write!(f, "closed"),
            Self::Stale(d) => write!(f, "stale: no frames for {:.1}s", d.as_secs_f64()),
            Self::MalformedHandshake => write!(f, "malformed_handshake: missing session_id"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Connected { session_id: String },
    /// `connected` without a usable session id.
    MalformedHandshake,
    MarketStats(Vec<MarketUpdate>),
    /// Valid JSON on some other channel (subscription acks and the like).
    Ignored,
    /// Not JSON, not an object, or a stats message whose payload is unusable.
    Malformed,
}

/// Classify one text frame. Pure; no side effects.
pub fn parse_message(raw: &str) -> FeedMessage {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return FeedMessage::Malformed;
    };
    let Some(obj) = value.as_object() else {
        return FeedMessage::Malformed;
    };

    if obj.get("type").and_then(Value::as_str) == Some("connected") {
        return match obj.get("session_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => FeedMessage::Connected {
                session_id: s.trim().to_string(),
            },
            Some(Value::Number(n)) => FeedMessage::Connected {
                session_id: n.to_string(),
            },
            _ => FeedMessage::MalformedHandshake,
        };
    }

    let channel = obj.get("channel").and_then(Value::as_str).unwrap_or("");
    if !channel.contains("market_stats") {
        return FeedMessage::Ignored;
    }

    let Some(stats) = obj.get("market_stats").and_then(Value::as_object) else {
        return FeedMessage::Malformed;
    };

    // Per-market channels deliver a single entry instead of an id-keyed map.
    if stats.contains_key("market_id") {
        let entry = Value::Object(stats.clone());
        return match parse_market_entry("", &entry) {
            Some(update) => FeedMessage::MarketStats(vec![update]),
            None => FeedMessage::Malformed,
        };
    }

    FeedMessage::MarketStats(
        stats
            .iter()
            .filter_map(|(key, entry)| parse_market_entry(key, entry))
            .collect(),
    )
}

/// Connection health, published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedHealth {
    pub session_id: Option<String>,
    pub last_error: Option<String>,
    pub last_message_at_ms: Option<i64>,
    pub markets_seen: usize,
    pub messages_received: u64,
    pub malformed_payloads: u64,
    pub reconnects: u64,
    pub connected: bool,
}

/// Write one update into the store. Returns the asset id, or `None` when no
/// symbol is known for the market yet.
pub fn apply_update(
    store: &MarketStateStore,
    directory: &MarketDirectory,
    update: &MarketUpdate,
    now_ms: i64,
) -> Option<String> {
    let symbol = update
        .symbol
        .clone()
        .or_else(|| directory.symbol_for(update.market_id))?;
    let asset = normalize_asset(&symbol);
    if asset.is_empty() {
        return None;
    }

    store.mutate(&asset, |m| {
        m.market_id = Some(update.market_id);
        m.book = BookTop {
            best_bid: update.best_bid,
            best_ask: update.best_ask,
            synthetic: update.synthetic_book,
        };
        m.stats.mark_price = update.mark_price.or(m.stats.mark_price);
        m.stats.index_price = update.index_price.or(m.stats.index_price);
        m.stats.daily_quote_volume = update.daily_quote_volume.or(m.stats.daily_quote_volume);
        m.updated_at_ms = Some(now_ms);
    });
    Some(asset)
}

pub struct LighterFeed {
    config: FeedConfig,
    store: Arc<MarketStateStore>,
    directory: Arc<MarketDirectory>,
    health: Arc<ArcSwap<FeedHealth>>,
}

impl LighterFeed {
    pub fn new(
        config: FeedConfig,
        store: Arc<MarketStateStore>,
        directory: Arc<MarketDirectory>,
    ) -> Self {
        Self {
            config,
            store,
            directory,
            health: Arc::new(ArcSwap::from_pointee(FeedHealth::default())),
        }
    }

    /// Latest health snapshot. Never blocks the ingest loop.
    pub fn health(&self) -> Arc<FeedHealth> {
        self.health.load_full()
    }

    /// Shared handle for readers that outlive `self` (the HTTP layer).
    pub fn health_handle(&self) -> Arc<ArcSwap<FeedHealth>> {
        self.health.clone()
    }

    fn update_health(&self, f: impl Fn(&mut FeedHealth)) {
        self.health.rcu(|current| {
            let mut next = FeedHealth::clone(current);
            f(&mut next);
            next
        });
    }

    /// Run until `stop` fires.
    pub async fn run(self: Arc<Self>, mut stop: StopSignal) {
        let mut backoff = ReconnectBackoff::new(self.config.backoff());
        let mut markets_seen: HashSet<i64> = HashSet::with_capacity(256);

        info!(url = %self.config.ws_url, "Lighter feed starting");

        while !stop.is_stopped() {
            tokio::select! {
                _ = stop.stopped() => break,
                known = self.directory.refresh() => {
                    debug!(known, "market directory ready");
                }
            }

            match self
                .connect_and_stream(&mut stop, &mut backoff, &mut markets_seen)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_secs = delay.as_secs_f64(),
                        "Lighter feed disconnected; reconnecting"
                    );
                    let reason = e.to_string();
                    self.update_health(|h| {
                        h.connected = false;
                        h.last_error = Some(reason.clone());
                        h.reconnects += 1;
                    });
                    if !stop.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        self.update_health(|h| {
            h.connected = false;
            if h.last_error.is_none() {
                h.last_error = Some("stopped".to_string());
            }
        });
        info!("Lighter feed stopped");
    }

    /// One connection lifetime. `Ok(())` only when stopped.
    async fn connect_and_stream(
        &self,
        stop: &mut StopSignal,
        backoff: &mut ReconnectBackoff,
        markets_seen: &mut HashSet<i64>,
    ) -> Result<(), FeedError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_message_bytes),
            max_frame_size: Some(self.config.max_message_bytes),
            ..Default::default()
        };
        let connect_timeout = secs(self.config.connect_timeout_secs);

        debug!(url = %self.config.ws_url, "connecting to Lighter WS");
        let connect = connect_async_with_config(self.config.ws_url.as_str(), Some(ws_config), true);
        let (ws_stream, resp) = tokio::select! {
            _ = stop.stopped() => return Ok(()),
            res = timeout(connect_timeout, connect) => match res {
                Err(_) => return Err(FeedError::ConnectTimeout(connect_timeout)),
                Ok(Err(e)) => return Err(FeedError::Connect(e.to_string())),
                Ok(Ok(pair)) => pair,
            },
        };
        info!(status = %resp.status(), "Lighter WS connected");
        backoff.reset();

        let (mut write, mut read) = ws_stream.split();
        write
            .send(Message::Text(subscribe_payload()))
            .await
            .map_err(|e| FeedError::Socket(e.to_string()))?;

        let mut ping = interval(secs(self.config.ping_interval_secs));
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ping.tick().await;

        let stale_after = self.config.stale_after();
        let mut last_frame = Instant::now();
        let mut unresolved = false;

        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = sleep_until(last_frame + stale_after) => {
                    let _ = write.send(Message::Close(None)).await;
                    return Err(FeedError::Stale(last_frame.elapsed()));
                }
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| FeedError::Socket(e.to_string()))?;
                    if unresolved {
                        unresolved = false;
                        let directory = self.directory.clone();
                        tokio::spawn(async move {
                            directory.refresh().await;
                        });
                    }
                }
                ws_msg = read.next() => {
                    let Some(ws_msg) = ws_msg else {
                        return Err(FeedError::StreamEnded);
                    };
                    last_frame = Instant::now();

                    match ws_msg {
                        Ok(Message::Text(text)) => {
                            unresolved |= self.handle_text(&text, markets_seen)?;
                        }
                        Ok(Message::Binary(bytes)) => {
                            let text = String::from_utf8_lossy(&bytes);
                            unresolved |= self.handle_text(&text, markets_seen)?;
                        }
                        Ok(Message::Ping(payload)) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .map_err(|e| FeedError::Socket(e.to_string()))?;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "Lighter WS close");
                            return Err(FeedError::Closed(frame.map(|f| f.reason.to_string())));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(FeedError::Socket(e.to_string())),
                    }
                }
            }
        }
    }

    /// Returns whether any market in the frame had no resolvable symbol.
    fn handle_text(&self, text: &str, markets_seen: &mut HashSet<i64>) -> Result<bool, FeedError> {
        match parse_message(text) {
            FeedMessage::Connected { session_id } => {
                info!(session_id = %session_id, "Lighter session established");
                self.update_health(|h| {
                    h.session_id = Some(session_id.clone());
                    h.last_error = None;
                    h.connected = true;
                    h.messages_received += 1;
                });
                Ok(false)
            }
            FeedMessage::MalformedHandshake => Err(FeedError::MalformedHandshake),
            FeedMessage::MarketStats(updates) => {
                let now_ms = Utc::now().timestamp_millis();
                let mut unresolved = false;
                for update in &updates {
                    markets_seen.insert(update.market_id);
                    if apply_update(&self.store, &self.directory, update, now_ms).is_none() {
                        unresolved = true;
                    }
                }
                let seen = markets_seen.len();
                self.update_health(|h| {
                    h.messages_received += 1;
                    h.last_message_at_ms = Some(now_ms);
                    h.markets_seen = seen;
                });
                Ok(unresolved)
            }
            FeedMessage::Ignored => {
                self.update_health(|h| h.messages_received += 1);
                Ok(false)
            }
            FeedMessage::Malformed => {
                debug!(len = text.len(), "dropping undecodable Lighter payload");
                self.update_health(|h| {
                    h.messages_received += 1;
                    h.malformed_payloads += 1;
                });
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::stop_channel;
    use crate::state::SyntheticSides;
    use serde_json::json;

    fn directory() -> Arc<MarketDirectory> {
        Arc::new(MarketDirectory::new("http://127.0.0.1:9/api/markets").unwrap())
    }

    fn feed() -> LighterFeed {
        LighterFeed::new(FeedConfig::default(), MarketStateStore::new(), directory())
    }

    #[test]
    fn test_parse_connected() {
        assert_eq!(
            parse_message(r#"{"type":"connected","session_id":"abc"}"#),
            FeedMessage::Connected {
                session_id: "abc".to_string()
            }
        );
        assert_eq!(
            parse_message(r#"{"type":"connected","session_id":42}"#),
            FeedMessage::Connected {
                session_id: "42".to_string()
            }
        );
        assert_eq!(
            parse_message(r#"{"type":"connected"}"#),
            FeedMessage::MalformedHandshake
        );
        assert_eq!(
            parse_message(r#"{"type":"connected","session_id":""}"#),
            FeedMessage::MalformedHandshake
        );
    }

    #[test]
    fn test_parse_market_stats_map() {
        let raw = json!({
            "channel": "market_stats:all",
            "type": "update/market_stats",
            "market_stats": {
                "0": {"symbol": "ETH", "best_bid": "3000", "best_ask": "3001"},
                "1": {"symbol": "BTC", "mark_price": 60000},
                "x": {"symbol": "BAD"}
            }
        })
        .to_string();

        let FeedMessage::MarketStats(mut updates) = parse_message(&raw) else {
            panic!("expected market stats");
        };
        updates.sort_by_key(|u| u.market_id);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].best_ask, Some(3001.0));
        assert!(!updates[0].synthetic_book.any());
        assert_eq!(updates[1].best_bid, Some(60000.0));
        assert!(updates[1].synthetic_book.bid && updates[1].synthetic_book.ask);
    }

    #[test]
    fn test_parse_single_market_entry() {
        let raw = json!({
            "channel": "market_stats:7",
            "market_stats": {"market_id": 7, "symbol": "SOL", "best_bid": 1, "best_ask": 2}
        })
        .to_string();
        let FeedMessage::MarketStats(updates) = parse_message(&raw) else {
            panic!("expected market stats");
        };
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].market_id, 7);
    }

    #[test]
    fn test_parse_other_messages() {
        assert_eq!(parse_message("not json"), FeedMessage::Malformed);
        assert_eq!(parse_message("[1,2]"), FeedMessage::Malformed);
        assert_eq!(
            parse_message(r#"{"type":"subscribed/market_stats","channel":"market_stats:all","market_stats":[]}"#),
            FeedMessage::Malformed
        );
        assert_eq!(
            parse_message(r#"{"type":"pong","channel":"other"}"#),
            FeedMessage::Ignored
        );
    }

    #[test]
    fn test_apply_update_keeps_volume_and_resolves_symbol() {
        let store = MarketStateStore::new();
        let dir = directory();
        dir.insert_for_test(3, "doge");

        let mut update = MarketUpdate {
            market_id: 3,
            symbol: None,
            index_price: Some(0.1),
            mark_price: Some(0.11),
            best_bid: Some(0.109),
            best_ask: Some(0.111),
            daily_quote_volume: Some(5_000.0),
            synthetic_book: SyntheticSides::default(),
        };
        assert_eq!(apply_update(&store, &dir, &update, 1_000).as_deref(), Some("DOGE"));

        update.daily_quote_volume = None;
        update.best_bid = None;
        update.best_ask = Some(0.112);
        apply_update(&store, &dir, &update, 2_000);

        let m = store.get_or_create("DOGE");
        assert_eq!(m.market_id, Some(3));
        assert_eq!(m.stats.daily_quote_volume, Some(5_000.0));
        assert_eq!(m.book.best_bid, None);
        assert_eq!(m.book.best_ask, Some(0.112));
        assert_eq!(m.updated_at_ms, Some(2_000));

        update.market_id = 99;
        assert!(apply_update(&store, &dir, &update, 3_000).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_handle_text_updates_health() {
        let feed = feed();
        let mut seen = HashSet::new();

        feed.handle_text(r#"{"type":"connected","session_id":"s1"}"#, &mut seen)
            .unwrap();
        let unresolved = feed
            .handle_text(
                r#"{"channel":"market_stats:all","market_stats":{"0":{"symbol":"ETH","best_ask":1},"5":{"best_ask":2}}}"#,
                &mut seen,
            )
            .unwrap();
        assert!(unresolved);
        feed.handle_text("garbage", &mut seen).unwrap();

        let h = feed.health();
        assert_eq!(h.session_id.as_deref(), Some("s1"));
        assert!(h.connected);
        assert_eq!(h.markets_seen, 2);
        assert_eq!(h.messages_received, 3);
        assert_eq!(h.malformed_payloads, 1);
        assert!(h.last_message_at_ms.is_some());

        assert_eq!(
            feed.handle_text(r#"{"type":"connected"}"#, &mut seen),
            Err(FeedError::MalformedHandshake)
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(FeedError::StreamEnded.to_string(), "stream_ended");
        assert_eq!(FeedError::Closed(None).to_string(), "closed");
        assert_eq!(
            FeedError::ConnectTimeout(Duration::from_secs(10)).to_string(),
            "connect_timeout: 10.0s"
        );
    }

    #[tokio::test]
    async fn test_stop_before_run_marks_stopped() {
        let feed = Arc::new(feed());
        let (handle, signal) = stop_channel();
        handle.stop();
        feed.clone().run(signal).await;
        let h = feed.health();
        assert_eq!(h.last_error.as_deref(), Some("stopped"));
        assert!(!h.connected);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_records_error_and_stops() {
        let config = FeedConfig {
            ws_url: "ws://127.0.0.1:9/stream".to_string(),
            connect_timeout_secs: 1.0,
            backoff_initial_secs: 5.0,
            ..FeedConfig::default()
        };
        let feed = Arc::new(LighterFeed::new(config, MarketStateStore::new(), directory()));
        let (handle, signal) = stop_channel();
        let task = tokio::spawn(feed.clone().run(signal));

        let deadline = Instant::now() + Duration::from_secs(5);
        while feed.health().reconnects == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.stop();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("feed did not stop")
            .unwrap();

        let h = feed.health();
        assert!(h.reconnects >= 1);
        let err = h.last_error.clone().unwrap_or_default();
        assert!(
            err.starts_with("connect_failed") || err.starts_with("connect_timeout"),
            "unexpected last_error {err}"
        );
    }
}
