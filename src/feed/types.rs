//! Quote types shared by all exchange feeds.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::FeedError;

/// Exchange identifier (e.g., "uniswap-v3").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    /// Create an exchange id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExchangeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A DEX the engine can quote against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// Stable id.
    pub id: ExchangeId,
    /// Display name.
    pub name: &'static str,
}

/// Base chain DEXs.
pub static BASE_EXCHANGES: Lazy<Vec<Exchange>> = Lazy::new(|| {
    [
        ("uniswap-v3", "Uniswap V3"),
        ("aerodrome", "Aerodrome"),
        ("baseswap", "BaseSwap"),
        ("sushiswap", "SushiSwap"),
    ]
    .into_iter()
    .map(|(id, name)| Exchange {
        id: ExchangeId::new(id),
        name,
    })
    .collect()
});

/// A single exchange's top-of-book for one token, in USD.
///
/// Produced fresh every scan cycle and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeQuote {
    /// Exchange that produced the quote.
    pub exchange: ExchangeId,
    /// Lowercase token address.
    pub token: String,
    /// Best bid (what we can sell at).
    pub bid: Decimal,
    /// Best ask (what we can buy at).
    pub ask: Decimal,
    /// Liquidity available near the top of book, in USD.
    pub liquidity_usd: Option<Decimal>,
    /// When the exchange observed these prices.
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl ExchangeQuote {
    /// Create a quote without liquidity information.
    pub fn new(
        exchange: impl Into<ExchangeId>,
        token: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
        observed_at: OffsetDateTime,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            token: token.into(),
            bid,
            ask,
            liquidity_usd: None,
            observed_at,
        }
    }

    /// Check the quote is usable: positive prices and not inverted.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO && self.ask >= self.bid
    }

    /// Mid price.
    pub fn mid(&self) -> Decimal {
        self.bid / Decimal::TWO + self.ask / Decimal::TWO
    }

    /// Age of the quote at `now`.
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        now - self.observed_at
    }

    /// Whether the quote is younger than `window` at `now`.
    pub fn is_fresh(&self, now: OffsetDateTime, window: Duration) -> bool {
        self.age(now) < window
    }
}

/// All quotes gathered in one scan cycle: exchange -> token -> quote.
///
/// Ordered maps keep every traversal deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuoteSnapshot {
    quotes: BTreeMap<ExchangeId, BTreeMap<String, ExchangeQuote>>,
}

impl QuoteSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from a list of quotes.
    pub fn from_quotes(quotes: impl IntoIterator<Item = ExchangeQuote>) -> Self {
        let mut snapshot = Self::new();
        for quote in quotes {
            snapshot.insert(quote);
        }
        snapshot
    }

    /// Insert a quote, keeping the most recent one per exchange and token.
    pub fn insert(&mut self, quote: ExchangeQuote) {
        let per_token = self.quotes.entry(quote.exchange.clone()).or_default();
        match per_token.get(&quote.token) {
            Some(existing) if existing.observed_at > quote.observed_at => {}
            _ => {
                per_token.insert(quote.token.clone(), quote);
            }
        }
    }

    /// Exchanges with at least one quote.
    pub fn exchanges(&self) -> impl Iterator<Item = &ExchangeId> {
        self.quotes.keys()
    }

    /// Quote from one exchange for one token.
    pub fn get(&self, exchange: &ExchangeId, token: &str) -> Option<&ExchangeQuote> {
        self.quotes.get(exchange)?.get(token)
    }

    /// All quotes for a token, ordered by exchange id.
    pub fn quotes_for(&self, token: &str) -> Vec<&ExchangeQuote> {
        self.quotes
            .values()
            .filter_map(|per_token| per_token.get(token))
            .collect()
    }

    /// Distinct token addresses present in the snapshot.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .quotes
            .values()
            .flat_map(|per_token| per_token.keys().cloned())
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens
    }

    /// Highest valid bid for a token across exchanges.
    pub fn best_bid(&self, token: &str) -> Option<Decimal> {
        self.quotes_for(token)
            .into_iter()
            .filter(|q| q.is_valid())
            .map(|q| q.bid)
            .max()
    }

    /// Lowest valid ask for a token across exchanges.
    pub fn best_ask(&self, token: &str) -> Option<Decimal> {
        self.quotes_for(token)
            .into_iter()
            .filter(|q| q.is_valid())
            .map(|q| q.ask)
            .min()
    }

    /// Mid of best bid and best ask for each token.
    pub fn mid_prices(&self) -> BTreeMap<String, Decimal> {
        self.tokens()
            .into_iter()
            .filter_map(|token| {
                let mid = self.best_bid(&token)? / Decimal::TWO + self.best_ask(&token)? / Decimal::TWO;
                Some((token, mid))
            })
            .collect()
    }

    /// Total number of quotes.
    pub fn len(&self) -> usize {
        self.quotes.values().map(BTreeMap::len).sum()
    }

    /// Whether there are no quotes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one fetch cycle across all exchanges.
#[derive(Debug, Clone, Default)]
pub struct FeedCycle {
    /// Quotes from the exchanges that answered.
    pub snapshot: QuoteSnapshot,
    /// One entry per exchange that was dropped this cycle.
    pub failures: Vec<FeedError>,
}
