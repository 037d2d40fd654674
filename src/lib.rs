//! SpreadWatch backend library
//!
//! Cross-venue spread monitoring: the Lighter stats feed, secondary venue
//! quotes, rolling baselines with anomaly detection, deeper-notional
//! confirmation and the HTTP surface. `main.rs` wires these into tasks.

pub mod api;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod series;
pub mod shutdown;
pub mod state;
pub mod stats;
