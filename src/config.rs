//! SpreadWatch configuration
//!
//! Defaults match the production deployment. Values can come from a TOML file
//! (`SpreadWatchConfig::load`) and/or environment variables
//! (`SpreadWatchConfig::from_env`, which overlays env on top of a base config).

use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, time::Duration};

use crate::feeds::backoff::BackoffConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpreadWatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub confirm: ConfirmConfig,
    #[serde(default)]
    pub quotes: QuotePollConfig,
    #[serde(default)]
    pub series: SeriesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Primary venue (Lighter) stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub ws_url: String,
    pub markets_url: String,
    pub connect_timeout_secs: f64,
    pub ping_interval_secs: f64,
    pub ping_timeout_secs: f64,
    pub max_message_bytes: usize,
    pub backoff_initial_secs: f64,
    pub backoff_multiplier: f64,
    pub backoff_max_secs: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://mainnet.zklighter.elliot.ai/stream".to_string(),
            markets_url: "https://explorer.elliot.ai/api/markets".to_string(),
            connect_timeout_secs: 10.0,
            ping_interval_secs: 20.0,
            ping_timeout_secs: 20.0,
            max_message_bytes: 4 * 1024 * 1024,
            backoff_initial_secs: 1.0,
            backoff_multiplier: 1.6,
            backoff_max_secs: 15.0,
        }
    }
}

impl FeedConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_secs: self.backoff_initial_secs,
            multiplier: self.backoff_multiplier,
            max_secs: self.backoff_max_secs,
        }
    }

    /// No inbound frame for this long means the connection is dead.
    pub fn stale_after(&self) -> Duration {
        secs(self.ping_interval_secs + self.ping_timeout_secs)
    }
}

/// Baseline tracker / anomaly detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_secs: f64,
    pub baseline_window_secs: i64,
    pub persist_secs: i64,
    pub min_delta_bps: f64,
    /// Secondary venue notional the live spread is quoted at.
    pub base_notional_usd: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_secs: 1.0,
            baseline_window_secs: 1800,
            persist_secs: 6,
            min_delta_bps: 8.0,
            base_notional_usd: 1500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmConfig {
    pub tick_secs: f64,
    pub notional_usd: f64,
    pub cooldown_secs: i64,
    /// Per-asset wait after a failed confirmation, doubling per failure.
    /// 0 disables it (retry on every tick).
    pub retry_base_secs: i64,
    pub retry_max_secs: i64,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            tick_secs: 1.0,
            notional_usd: 3000.0,
            cooldown_secs: 30,
            retry_base_secs: 0,
            retry_max_secs: 60,
        }
    }
}

/// Secondary quote poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotePollConfig {
    pub poll_interval_secs: f64,
    pub top_n: usize,
    pub request_spacing_ms: u64,
    /// Batch quotes older than this are not served to the engine. 0 = no limit.
    pub max_quote_age_secs: i64,
}

impl Default for QuotePollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 8.0,
            top_n: 50,
            request_spacing_ms: 400,
            max_quote_age_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub sample_every_secs: f64,
    pub retention_secs: f64,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            sample_every_secs: 2.0,
            retention_secs: 2.0 * 60.0 * 60.0,
        }
    }
}

impl SeriesConfig {
    /// Ring capacity for a given push cadence, with a little headroom.
    pub fn capacity_for(&self, cadence_secs: f64) -> usize {
        (self.retention_secs / cadence_secs.max(0.25)) as usize + 50
    }
}

impl SpreadWatchConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        override_from_env(&mut self.server.port, "PORT");
        override_string(&mut self.server.bind_addr, "BIND_ADDR");

        override_string(&mut self.feed.ws_url, "LIGHTER_WS_URL");
        override_string(&mut self.feed.markets_url, "LIGHTER_MARKETS_URL");

        override_from_env(&mut self.engine.tick_secs, "ENGINE_TICK_SEC");
        override_from_env(&mut self.engine.baseline_window_secs, "BASELINE_WINDOW_SEC");
        override_from_env(&mut self.engine.persist_secs, "PERSIST_SEC");
        override_from_env(&mut self.engine.min_delta_bps, "MIN_DELTA_BPS");
        override_from_env(&mut self.engine.base_notional_usd, "VAR_NOTIONAL_USD");

        override_from_env(&mut self.confirm.tick_secs, "CONFIRM_TICK_SEC");
        override_from_env(&mut self.confirm.notional_usd, "CONFIRM_NOTIONAL_USD");
        override_from_env(&mut self.confirm.cooldown_secs, "VAR_CONFIRM_COOLDOWN_SEC");
        override_from_env(&mut self.confirm.retry_base_secs, "CONFIRM_RETRY_BASE_SEC");

        override_from_env(&mut self.quotes.poll_interval_secs, "VAR_POLL_INTERVAL_SEC");
        override_from_env(&mut self.quotes.top_n, "VAR_TOP_N");
        override_from_env(&mut self.quotes.max_quote_age_secs, "VAR_MAX_QUOTE_AGE_SEC");

        override_from_env(&mut self.series.sample_every_secs, "SPREAD_SAMPLE_EVERY_S");
        self
    }
}

pub fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v.max(0.0))
}

fn override_from_env<T: FromStr>(slot: &mut T, var: &str) {
    if let Some(v) = std::env::var(var).ok().and_then(|v| v.trim().parse::<T>().ok()) {
        *slot = v;
    }
}

fn override_string(slot: &mut String, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *slot = v.trim().to_string();
        }
    }
}
