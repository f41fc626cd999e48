//! Mock exchange feed for tests and keyless demo runs.
//!
//! This module provides a feed that answers from in-memory quotes
//! without making network requests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::adapter::ExchangeFeed;
use super::types::{ExchangeId, ExchangeQuote, BASE_EXCHANGES};
use crate::error::FeedError;
use crate::token::{Token, BASE_TOKENS};

/// Stored quote; `observed_at` of `None` means "stamp at fetch time".
#[derive(Debug, Clone)]
struct MockQuote {
    bid: Decimal,
    ask: Decimal,
    liquidity_usd: Option<Decimal>,
    observed_at: Option<OffsetDateTime>,
}

/// Mock exchange feed.
#[derive(Debug, Clone)]
pub struct MockExchangeFeed {
    id: ExchangeId,
    quotes: Arc<Mutex<BTreeMap<String, MockQuote>>>,
    fail: Arc<AtomicBool>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockExchangeFeed {
    /// Create a feed with no quotes.
    pub fn new(id: impl Into<ExchangeId>) -> Self {
        Self {
            id: id.into(),
            quotes: Arc::new(Mutex::new(BTreeMap::new())),
            fail: Arc::new(AtomicBool::new(false)),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a quote stamped at fetch time.
    pub fn with_quote(self, token: impl Into<String>, bid: Decimal, ask: Decimal) -> Self {
        self.set_quote(token, bid, ask);
        self
    }

    /// Add a quote with a fixed observation time.
    pub fn with_quote_at(
        self,
        token: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
        observed_at: OffsetDateTime,
    ) -> Self {
        self.lock().insert(
            token.into(),
            MockQuote {
                bid,
                ask,
                liquidity_usd: None,
                observed_at: Some(observed_at),
            },
        );
        self
    }

    /// Add a quote with liquidity information.
    pub fn with_liquid_quote(
        self,
        token: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
        liquidity_usd: Decimal,
    ) -> Self {
        self.lock().insert(
            token.into(),
            MockQuote {
                bid,
                ask,
                liquidity_usd: Some(liquidity_usd),
                observed_at: None,
            },
        );
        self
    }

    /// Simulate network latency on every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every fetch fail.
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    /// Replace the quote for a token.
    pub fn set_quote(&self, token: impl Into<String>, bid: Decimal, ask: Decimal) {
        self.lock().insert(
            token.into(),
            MockQuote {
                bid,
                ask,
                liquidity_usd: None,
                observed_at: None,
            },
        );
    }

    /// Toggle failure mode.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of fetches served (including failures).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MockQuote>> {
        self.quotes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ExchangeFeed for MockExchangeFeed {
    fn id(&self) -> &ExchangeId {
        &self.id
    }

    async fn fetch(&self, tokens: &[Token]) -> Result<Vec<ExchangeQuote>, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(FeedError::Unavailable {
                exchange: self.id.to_string(),
                reason: "mock failure".to_string(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let quotes = self.lock();
        Ok(tokens
            .iter()
            .filter_map(|token| {
                let q = quotes.get(&token.address)?;
                Some(ExchangeQuote {
                    exchange: self.id.clone(),
                    token: token.address.clone(),
                    bid: q.bid,
                    ask: q.ask,
                    liquidity_usd: q.liquidity_usd,
                    observed_at: q.observed_at.unwrap_or(now),
                })
            })
            .collect())
    }
}

/// Reference USD prices for the default tokens used by simulated feeds.
fn reference_price(symbol: &str) -> Decimal {
    match symbol {
        "WETH" => Decimal::new(246_785, 2), // 2467.85
        _ => Decimal::ONE,
    }
}

/// Simulated feeds for every Base DEX, each skewed by a fixed offset.
///
/// Used when no real endpoints are configured so the engine has
/// something to scan.
pub fn simulated_feeds() -> Vec<MockExchangeFeed> {
    // Offsets in basis points; half-spread of 5 bps.
    let offsets = [-45i64, 45, 10, -5];
    let half_spread = Decimal::new(5, 4);

    BASE_EXCHANGES
        .iter()
        .zip(offsets)
        .map(|(exchange, offset_bps)| {
            let skew = Decimal::ONE + Decimal::new(offset_bps, 4);
            BASE_TOKENS.iter().fold(
                MockExchangeFeed::new(exchange.id.clone()),
                |feed, token| {
                    let mid = reference_price(&token.symbol) * skew;
                    feed.with_liquid_quote(
                        token.address.clone(),
                        (mid * (Decimal::ONE - half_spread)).round_dp(6),
                        (mid * (Decimal::ONE + half_spread)).round_dp(6),
                        Decimal::new(250_000, 0),
                    )
                },
            )
        })
        .collect()
}
