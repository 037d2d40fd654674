//! In-memory state shared by the feed, engine and API tasks.

pub mod market;
pub mod store;
pub mod var_batch;

pub use market::{
    normalize_asset, BookTop, Computed, ConfirmInfo, Market, MarketStats, SecondaryQuote,
    SpreadSample, SyntheticSides,
};
pub use store::{is_crypto_symbol, MarketStateStore, PrimaryPrice, VolumeRow};
pub use var_batch::{BatchOutcome, BatchQuote, BatchQuoteStore, RawBatchQuote, RejectReason};
