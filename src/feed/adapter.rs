//! Price feed adapter: fans out to every exchange feed and joins the results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, instrument, warn};

use super::types::{ExchangeId, ExchangeQuote, FeedCycle, QuoteSnapshot};
use crate::error::FeedError;
use crate::metrics;
use crate::token::Token;

/// A source of top-of-book quotes for one exchange.
#[async_trait]
pub trait ExchangeFeed: Send + Sync {
    /// Exchange this feed quotes.
    fn id(&self) -> &ExchangeId;

    /// Fetch quotes for the given tokens.
    ///
    /// Tokens the exchange does not list are simply absent from the result.
    async fn fetch(&self, tokens: &[Token]) -> Result<Vec<ExchangeQuote>, FeedError>;
}

/// Normalizes quotes from N exchanges into one snapshot per cycle.
#[derive(Clone)]
pub struct PriceFeedAdapter {
    feeds: Vec<Arc<dyn ExchangeFeed>>,
    timeout: Duration,
}

impl PriceFeedAdapter {
    /// Create an adapter over the given feeds with a per-exchange timeout.
    pub fn new(feeds: Vec<Arc<dyn ExchangeFeed>>, timeout: Duration) -> Self {
        Self { feeds, timeout }
    }

    /// Exchanges this adapter queries.
    pub fn exchanges(&self) -> Vec<ExchangeId> {
        self.feeds.iter().map(|f| f.id().clone()).collect()
    }

    /// Per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch quotes from every exchange concurrently.
    ///
    /// Each exchange call is independently time-boxed. A failing or slow
    /// exchange is dropped from this cycle and recorded in `failures`;
    /// the cycle proceeds with whatever succeeded.
    #[instrument(skip(self, tokens), fields(exchanges = self.feeds.len(), tokens = tokens.len()))]
    pub async fn fetch_quotes(&self, tokens: &[Token]) -> FeedCycle {
        let wanted: HashSet<&str> = tokens.iter().map(|t| t.address.as_str()).collect();

        let calls = self.feeds.iter().map(|feed| {
            let feed = Arc::clone(feed);
            async move {
                let start = Instant::now();
                let result = match tokio::time::timeout(self.timeout, feed.fetch(tokens)).await {
                    Ok(result) => result,
                    Err(_) => Err(FeedError::Timeout {
                        exchange: feed.id().to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }),
                };
                metrics::record_feed_fetch_latency(start, feed.id().as_str());
                (feed.id().clone(), result)
            }
        });

        let mut cycle = FeedCycle::default();
        let mut snapshot = QuoteSnapshot::new();

        for (exchange, result) in join_all(calls).await {
            match result {
                Ok(quotes) => {
                    let mut accepted = 0usize;
                    for quote in quotes {
                        if quote.exchange != exchange {
                            warn!(
                                exchange = %exchange,
                                claimed = %quote.exchange,
                                "Quote attributed to another exchange, discarding"
                            );
                            continue;
                        }
                        if !wanted.contains(quote.token.as_str()) {
                            continue;
                        }
                        if !quote.is_valid() {
                            warn!(
                                exchange = %exchange,
                                token = %quote.token,
                                bid = %quote.bid,
                                ask = %quote.ask,
                                "Invalid or inverted quote, discarding"
                            );
                            continue;
                        }
                        snapshot.insert(quote);
                        accepted += 1;
                    }
                    debug!(exchange = %exchange, quotes = accepted, "Exchange quotes fetched");
                }
                Err(err) => {
                    warn!(exchange = %exchange, error = %err, "Exchange dropped from this cycle");
                    metrics::inc_feed_failures(exchange.as_str());
                    cycle.failures.push(err);
                }
            }
        }

        cycle.snapshot = snapshot;
        cycle
    }
}

impl std::fmt::Debug for PriceFeedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceFeedAdapter")
            .field("exchanges", &self.exchanges())
            .field("timeout", &self.timeout)
            .finish()
    }
}
