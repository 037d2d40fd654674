//! SpreadWatch - Lighter vs Variational spread monitor
//!
//! Tasks: Lighter stats feed, secondary quote poller, spread engine,
//! confirmation executor, HTTP API. All of them stop on Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::{path::Path, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spreadwatch_backend::{
    api::{create_router, ApiState},
    config::SpreadWatchConfig,
    engine::{ConfirmationExecutor, SpreadEngine, TopOfBookLiquidity},
    feeds::{BatchQuoteProvider, LighterFeed, MarketDirectory, QuoteProvider, SecondaryQuotePoller},
    series::TimeSeriesRecorder,
    shutdown::stop_channel,
    state::{BatchQuoteStore, MarketStateStore},
};

#[derive(Parser, Debug)]
#[command(name = "spreadwatch")]
#[command(about = "Cross-venue spread monitor (Lighter vs Variational)")]
struct Args {
    /// TOML config file; environment variables override it
    #[arg(short, long, env = "SPREADWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Disable the Lighter stream (HTTP ingestion only)
    #[arg(long, env = "SPREADWATCH_NO_FEED", default_value_t = false)]
    no_feed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SpreadWatchConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?
            .with_env_overrides(),
        None => SpreadWatchConfig::from_env(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!(
        port = config.server.port,
        ws_url = %config.feed.ws_url,
        base_notional = config.engine.base_notional_usd,
        confirm_notional = config.confirm.notional_usd,
        "starting SpreadWatch"
    );

    let store = MarketStateStore::new();
    let quotes = Arc::new(BatchQuoteStore::new());
    let cadence = config.series.sample_every_secs.min(config.engine.tick_secs);
    let recorder = Arc::new(TimeSeriesRecorder::new(config.series.capacity_for(cadence)));
    let directory = Arc::new(MarketDirectory::new(config.feed.markets_url.clone())?);

    let provider: Arc<dyn QuoteProvider> = Arc::new(
        BatchQuoteProvider::new(quotes.clone()).with_max_age_secs(config.quotes.max_quote_age_secs),
    );

    let feed = Arc::new(LighterFeed::new(
        config.feed.clone(),
        store.clone(),
        directory,
    ));
    let poller = Arc::new(SecondaryQuotePoller::new(
        config.quotes.clone(),
        config.engine.base_notional_usd,
        config.confirm.notional_usd,
        store.clone(),
        provider.clone(),
    ));
    let engine = Arc::new(SpreadEngine::new(
        config.engine.clone(),
        store.clone(),
        recorder.clone(),
    ));
    let confirmer = Arc::new(ConfirmationExecutor::new(
        config.confirm.clone(),
        store.clone(),
        Arc::new(TopOfBookLiquidity::new(store.clone())),
        provider,
    ));

    let (stop, stop_signal) = stop_channel();
    let mut tasks = Vec::new();
    if args.no_feed {
        warn!("Lighter feed disabled; primary prices will stay empty");
    } else {
        tasks.push(tokio::spawn(feed.clone().run(stop.signal())));
    }
    tasks.push(tokio::spawn(poller.run(stop.signal())));
    tasks.push(tokio::spawn(engine.run(stop.signal())));
    tasks.push(tokio::spawn(confirmer.run(stop.signal())));

    let state = ApiState::new(
        store,
        quotes,
        recorder,
        feed.health_handle(),
        config.series.sample_every_secs,
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    let shutdown_stop = stop.clone();
    let mut server_stop = stop_signal;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        error!(error = %e, "failed to listen for Ctrl-C");
                    }
                    info!("shutdown requested");
                }
                _ = server_stop.stopped() => {}
            }
            shutdown_stop.stop();
        })
        .await
        .context("Server error");

    stop.stop();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task panicked");
        }
    }
    info!("SpreadWatch stopped");
    served
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spreadwatch_backend=info,spreadwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
