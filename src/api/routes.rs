use arc_swap::ArcSwap;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{sync::Arc, time::Instant};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::engine::spread::{compute_spread, SpreadMode, SpreadView};
use crate::feeds::lighter_ws::FeedHealth;
use crate::series::{parse_window_secs, Metric, SeriesPoint, TimeSeriesRecorder};
use crate::state::{
    normalize_asset, BatchOutcome, BatchQuoteStore, BookTop, Computed, Market,
    MarketStateStore, MarketStats, RawBatchQuote, SecondaryQuote,
};

const MAX_TOP_N: usize = 200;

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<MarketStateStore>,
    pub quotes: Arc<BatchQuoteStore>,
    pub recorder: Arc<TimeSeriesRecorder>,
    pub feed_health: Arc<ArcSwap<FeedHealth>>,
    pub sample_every_secs: f64,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(
        store: Arc<MarketStateStore>,
        quotes: Arc<BatchQuoteStore>,
        recorder: Arc<TimeSeriesRecorder>,
        feed_health: Arc<ArcSwap<FeedHealth>>,
        sample_every_secs: f64,
    ) -> Self {
        Self {
            store,
            quotes,
            recorder,
            feed_health,
            sample_every_secs,
            started_at: Instant::now(),
        }
    }
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/top_bases", get(get_top_bases))
        .route("/api/markets", get(get_markets))
        .route("/api/debug/latest", get(get_debug_latest))
        .route("/api/chart/bases", get(get_chart_bases))
        .route("/api/chart/series", get(get_chart_series))
        .route("/api/engine/markets", get(get_engine_markets))
        .route("/api/engine/markets/:base", get(get_engine_market))
        .route("/ingest/var_batch", post(post_var_batch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let feed = FeedHealth::clone(&state.feed_health.load());
    let active_bases = state.quotes.active_bases();
    Json(HealthResponse {
        ok: true,
        tick_ms: Utc::now().timestamp_millis(),
        markets_count: state.store.len(),
        session_id: feed.session_id.clone(),
        last_error: feed.last_error.clone(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        active_bases_count: active_bases.len(),
        active_bases,
        var_batch_key_count: state.quotes.key_count(),
        sample_every_s: state.sample_every_secs,
        feed,
    })
}

async fn get_top_bases(
    State(state): State<ApiState>,
    Query(params): Query<TopBasesQuery>,
) -> Result<Json<Value>, ApiError> {
    let top_n = params.top_n.unwrap_or(20);
    if !(1..=MAX_TOP_N).contains(&top_n) {
        return Err(ApiError::BadRequest(format!(
            "top_n must be between 1 and {}",
            MAX_TOP_N
        )));
    }
    let rows: Vec<TopBaseRow> = state
        .store
        .volume_ranked(top_n)
        .into_iter()
        .map(|r| TopBaseRow {
            base: r.base,
            lighter_market_id: r.market_id,
            lighter_best_bid: r.best_bid,
            lighter_best_ask: r.best_ask,
            lighter_mark_price: r.mark_price,
            lighter_daily_quote_volume: r.daily_quote_volume,
        })
        .collect();
    Ok(Json(json!({
        "ok": true,
        "top_n": top_n,
        "count": rows.len(),
        "rows": rows,
    })))
}

async fn get_markets(
    State(state): State<ApiState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<SpreadView>>, ApiError> {
    let notional = positive_notional(params.notional)?;
    let mode = params
        .spread_mode
        .as_deref()
        .map(SpreadMode::parse_lossy)
        .unwrap_or_default();

    let rows = params
        .bases
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(normalize_asset)
        .filter(|b| !b.is_empty())
        .map(|base| compute_spread(&state.store, &state.quotes, &base, notional, mode))
        .collect();
    Ok(Json(rows))
}

async fn get_debug_latest(
    State(state): State<ApiState>,
    Query(params): Query<DebugLatestQuery>,
) -> Result<Json<Value>, ApiError> {
    let notional = positive_notional(params.notional)?;
    let mode = params
        .mode
        .as_deref()
        .map(SpreadMode::parse_lossy)
        .unwrap_or_default();
    let base = params.base.as_deref().unwrap_or("BTC");
    let view = compute_spread(&state.store, &state.quotes, base, notional, mode);

    let mut body = serde_json::to_value(view).unwrap_or_else(|_| json!({}));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("ok".to_string(), Value::Bool(true));
    }
    Ok(Json(body))
}

async fn get_chart_bases(State(state): State<ApiState>) -> Json<Value> {
    let bases = state.quotes.active_bases();
    Json(json!({
        "ok": true,
        "count": bases.len(),
        "bases": bases,
    }))
}

async fn get_chart_series(
    State(state): State<ApiState>,
    Query(params): Query<SeriesQuery>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let base = normalize_asset(params.base.as_deref().unwrap_or("BTC"));
    let window = params.window.unwrap_or_else(|| "5m".to_string());
    let metric = Metric::parse_lossy(params.metric.as_deref().unwrap_or("bps"));
    let mode = params
        .mode
        .unwrap_or_else(|| SpreadMode::default().as_str().to_string())
        .trim()
        .to_string();

    let cutoff_ms = parse_window_secs(&window)
        .and_then(|secs| secs.checked_mul(1000))
        .and_then(|ms| Utc::now().timestamp_millis().checked_sub(ms))
        .ok_or_else(|| ApiError::BadRequest(format!("invalid window: {}", window)))?;

    let points: Vec<ChartPoint> = match mode.parse::<SpreadMode>() {
        Ok(m) => state
            .recorder
            .query(&base, m, cutoff_ms)
            .iter()
            .map(|p| ChartPoint::new(p, metric))
            .collect(),
        Err(e) => {
            debug!(error = %e, "series requested for unknown mode");
            Vec::new()
        }
    };

    Ok(Json(SeriesResponse {
        ok: true,
        base,
        metric: metric.as_str(),
        mode,
        window,
        count: points.len(),
        latest: points.last().copied(),
        points,
    }))
}

async fn get_engine_markets(State(state): State<ApiState>) -> Json<Value> {
    let mut rows: Vec<EngineMarketRow> = state
        .store
        .snapshot_all()
        .iter()
        .map(EngineMarketRow::from)
        .collect();
    rows.sort_by(|a, b| a.base.cmp(&b.base));
    let active = rows.iter().filter(|r| r.computed.anomaly_active).count();
    Json(json!({
        "ok": true,
        "count": rows.len(),
        "active_anomalies": active,
        "markets": rows,
    }))
}

async fn get_engine_market(
    State(state): State<ApiState>,
    Path(base): Path<String>,
) -> Result<Json<EngineMarketRow>, ApiError> {
    state
        .store
        .read(&base, |m| EngineMarketRow::from(m))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Market {} not found", normalize_asset(&base))))
}

/// `{ "quotes": [ {base, notional_usd, bid, ask, mid?, qty_used?}, ... ] }`.
/// Anything that is not a list of objects stores nothing.
async fn post_var_batch(State(state): State<ApiState>, Json(payload): Json<Value>) -> Json<Value> {
    let stored = ingest_var_batch(&state, &payload);
    Json(json!({"ok": true, "count": stored}))
}

/// Returns the number of stored quotes.
pub fn ingest_var_batch(state: &ApiState, payload: &Value) -> usize {
    let Some(quotes) = payload.get("quotes").and_then(Value::as_array) else {
        return 0;
    };

    let mut stored = 0;
    let mut rejected = 0;
    for entry in quotes.iter().filter(|q| q.is_object()) {
        let Ok(raw) = serde_json::from_value::<RawBatchQuote>(entry.clone()) else {
            rejected += 1;
            continue;
        };
        match state.quotes.ingest(&raw, |base| state.store.primary_price(base)) {
            BatchOutcome::Stored(quote) => {
                stored += 1;
                let now_ms = Utc::now().timestamp_millis();
                for mode in SpreadMode::BATCH_SERIES {
                    let view = compute_spread(
                        &state.store,
                        &state.quotes,
                        &quote.base,
                        quote.notional_usd as f64,
                        mode,
                    );
                    if let (Some(usd), Some(bps)) = (view.spread_usd, view.spread_bps) {
                        state
                            .recorder
                            .push(&quote.base, mode, SeriesPoint { t_ms: now_ms, usd, bps });
                    }
                }
            }
            BatchOutcome::Rejected(reason) => {
                rejected += 1;
                debug!(base = ?raw.base, reason = %reason, "batch quote rejected");
            }
        }
    }
    debug!(stored, rejected, "var batch ingested");
    stored
}

fn positive_notional(notional: Option<f64>) -> Result<f64, ApiError> {
    match notional {
        None => Ok(1500.0),
        Some(n) if n.is_finite() && n > 0.0 => Ok(n),
        Some(n) => Err(ApiError::BadRequest(format!(
            "notional must be positive, got {}",
            n
        ))),
    }
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct TopBasesQuery {
    top_n: Option<usize>,
}

#[derive(Deserialize)]
struct MarketsQuery {
    notional: Option<f64>,
    /// Comma-separated list
    bases: Option<String>,
    spread_mode: Option<String>,
}

#[derive(Deserialize)]
struct DebugLatestQuery {
    base: Option<String>,
    notional: Option<f64>,
    mode: Option<String>,
}

#[derive(Deserialize)]
struct SeriesQuery {
    base: Option<String>,
    window: Option<String>,
    metric: Option<String>,
    mode: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    tick_ms: i64,
    markets_count: usize,
    session_id: Option<String>,
    last_error: Option<String>,
    uptime_sec: u64,
    active_bases: Vec<String>,
    active_bases_count: usize,
    var_batch_key_count: usize,
    sample_every_s: f64,
    feed: FeedHealth,
}

#[derive(Serialize)]
struct TopBaseRow {
    base: String,
    lighter_market_id: Option<i64>,
    lighter_best_bid: Option<f64>,
    lighter_best_ask: Option<f64>,
    lighter_mark_price: Option<f64>,
    lighter_daily_quote_volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub t: i64,
    pub v: f64,
}

impl ChartPoint {
    fn new(p: &SeriesPoint, metric: Metric) -> Self {
        Self {
            t: p.t_ms,
            v: metric.value(p),
        }
    }
}

#[derive(Serialize)]
struct SeriesResponse {
    ok: bool,
    base: String,
    metric: &'static str,
    mode: String,
    window: String,
    count: usize,
    points: Vec<ChartPoint>,
    latest: Option<ChartPoint>,
}

#[derive(Serialize)]
struct EngineMarketRow {
    base: String,
    market_id: Option<i64>,
    book: BookTop,
    stats: MarketStats,
    secondary_quote: SecondaryQuote,
    computed: Computed,
    history_len: usize,
    updated_at_ms: Option<i64>,
}

impl From<&Market> for EngineMarketRow {
    fn from(m: &Market) -> Self {
        Self {
            base: m.id.clone(),
            market_id: m.market_id,
            book: m.book,
            stats: m.stats,
            secondary_quote: m.secondary_quote,
            computed: m.computed.clone(),
            history_len: m.history.len(),
            updated_at_ms: m.updated_at_ms,
        }
    }
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "ok": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
