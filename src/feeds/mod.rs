//! Primary and secondary venue inputs

pub mod backoff;
pub mod fields;
pub mod lighter_markets;
pub mod lighter_ws;
pub mod var_quotes;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use fields::MarketUpdate;
pub use lighter_markets::MarketDirectory;
pub use lighter_ws::{FeedError, FeedHealth, FeedMessage, LighterFeed};
pub use var_quotes::{BatchQuoteProvider, QuoteProvider, SecondaryQuotePoller};
