//! Price feed module.
//!
//! This module handles:
//! - Quote and snapshot types
//! - The adapter that fans out to exchanges with per-exchange timeouts
//! - HTTP and mock exchange feeds

pub mod adapter;
pub mod http;
pub mod mock;
pub mod types;

pub use adapter::{ExchangeFeed, PriceFeedAdapter};
pub use http::HttpQuoteFeed;
pub use mock::{simulated_feeds, MockExchangeFeed};
pub use types::{Exchange, ExchangeId, ExchangeQuote, FeedCycle, QuoteSnapshot, BASE_EXCHANGES};
