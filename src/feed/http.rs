//! HTTP quote feed.
//!
//! Expects `GET {base}/quotes?tokens=0x..,0x..` to answer with a JSON
//! array of `{token, bid, ask, liquidity?, timestamp?}` objects, where
//! prices may be strings or numbers and `timestamp` is unix seconds.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use url::Url;

use super::adapter::ExchangeFeed;
use super::types::{ExchangeId, ExchangeQuote};
use crate::error::FeedError;
use crate::token::{normalize_address, Token};

/// Quote as returned by an HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpQuote {
    /// Token address.
    #[serde(alias = "address", alias = "tokenAddress")]
    pub token: String,
    /// Best bid.
    #[serde(alias = "bidPrice")]
    pub bid: Decimal,
    /// Best ask.
    #[serde(alias = "askPrice")]
    pub ask: Decimal,
    /// Liquidity in USD.
    #[serde(default, alias = "liquidityUsd")]
    pub liquidity: Option<Decimal>,
    /// Observation time, unix seconds.
    #[serde(default, alias = "observedAt")]
    pub timestamp: Option<i64>,
}

/// Exchange feed backed by a JSON-over-HTTP quote endpoint.
#[derive(Debug, Clone)]
pub struct HttpQuoteFeed {
    id: ExchangeId,
    base_url: Url,
    http: reqwest::Client,
}

impl HttpQuoteFeed {
    /// Create a feed for `id` served at `base_url`.
    pub fn new(id: impl Into<ExchangeId>, base_url: Url, http: reqwest::Client) -> Self {
        Self {
            id: id.into(),
            base_url,
            http,
        }
    }

    /// Endpoint for a quote request.
    pub fn quotes_url(&self, tokens: &[Token]) -> Result<Url, FeedError> {
        let mut url = self.base_url.join("quotes").map_err(|e| FeedError::Malformed {
            exchange: self.id.to_string(),
            reason: format!("bad base url: {}", e),
        })?;
        let list = tokens
            .iter()
            .map(|t| t.address.as_str())
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut().append_pair("tokens", &list);
        Ok(url)
    }
}

#[async_trait]
impl ExchangeFeed for HttpQuoteFeed {
    fn id(&self) -> &ExchangeId {
        &self.id
    }

    #[instrument(skip(self, tokens), fields(exchange = %self.id))]
    async fn fetch(&self, tokens: &[Token]) -> Result<Vec<ExchangeQuote>, FeedError> {
        let url = self.quotes_url(tokens)?;
        let unavailable = |reason: String| FeedError::Unavailable {
            exchange: self.id.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unavailable(format!("failed to read body: {}", e)))?;

        parse_quotes(&self.id, &body, OffsetDateTime::now_utc())
    }
}

/// Parse an HTTP quote body into normalized quotes.
///
/// Quotes without a timestamp are stamped with `now`.
pub fn parse_quotes(
    exchange: &ExchangeId,
    body: &str,
    now: OffsetDateTime,
) -> Result<Vec<ExchangeQuote>, FeedError> {
    let malformed = |reason: String| FeedError::Malformed {
        exchange: exchange.to_string(),
        reason,
    };

    let raw: Vec<HttpQuote> = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let quotes = raw
        .into_iter()
        .map(|q| {
            let token = normalize_address(&q.token).map_err(|e| malformed(e.to_string()))?;
            let observed_at = match q.timestamp {
                Some(ts) => OffsetDateTime::from_unix_timestamp(ts)
                    .map_err(|e| malformed(format!("bad timestamp {}: {}", ts, e)))?,
                None => now,
            };
            Ok(ExchangeQuote {
                exchange: exchange.clone(),
                token,
                bid: q.bid,
                ask: q.ask,
                liquidity_usd: q.liquidity,
                observed_at,
            })
        })
        .collect::<Result<Vec<_>, FeedError>>()?;

    debug!(exchange = %exchange, count = quotes.len(), "Parsed HTTP quotes");
    Ok(quotes)
}
