//! Cross-exchange arbitrage opportunity detection.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::calculator::{calculate_opportunity, profit_percentage, ArbitrageOpportunity, DetectionParams};
use crate::feed::{ExchangeId, ExchangeQuote, QuoteSnapshot};
use crate::metrics;
use crate::token::Token;

/// Detect every opportunity in a quote snapshot.
///
/// For each token, every unordered pair of exchanges with a valid quote
/// is compared in both directions; the direction buying at the lower
/// ask and selling at the higher bid is kept if it clears the threshold.
/// The result is sorted by profit descending, then symbol ascending, and
/// is identical for identical inputs. `limit` truncates only when given.
#[instrument(skip_all, fields(tokens = tokens.len(), quotes = snapshot.len()))]
pub fn detect_opportunities(
    snapshot: &QuoteSnapshot,
    tokens: &[Token],
    params: &DetectionParams,
    now: OffsetDateTime,
    limit: Option<usize>,
) -> Vec<ArbitrageOpportunity> {
    let _timer = metrics::timer_opportunity_detection();
    let mut opportunities = Vec::new();

    for token in tokens {
        let quotes: Vec<&ExchangeQuote> = snapshot
            .quotes_for(&token.address)
            .into_iter()
            .filter(|q| q.is_valid())
            .collect();

        if quotes.len() < 2 {
            continue;
        }

        let before = opportunities.len();
        for (i, a) in quotes.iter().enumerate() {
            for b in &quotes[i + 1..] {
                let forward = calculate_opportunity(token, a, b, params, now);
                let backward = calculate_opportunity(token, b, a, params, now);
                // At most one direction can be profitable for valid quotes.
                if let Some(best) = better_of(forward, backward) {
                    opportunities.push(best);
                }
            }
        }

        if opportunities.len() == before {
            if let Some(diag) = best_spread(snapshot, token) {
                debug!(token = %token.symbol, diagnosis = %diag, "No arbitrage opportunity");
            }
        }
    }

    opportunities.sort_by(compare_opportunities);

    if let Some(limit) = limit {
        opportunities.truncate(limit);
    }

    if !opportunities.is_empty() {
        metrics::inc_opportunities_detected(opportunities.len() as u64);
        info!(
            count = opportunities.len(),
            best_id = %opportunities[0].id,
            best_profit = %opportunities[0].profit_absolute.round_dp(2),
            "Arbitrage opportunities detected"
        );
    }

    opportunities
}

fn better_of(
    a: Option<ArbitrageOpportunity>,
    b: Option<ArbitrageOpportunity>,
) -> Option<ArbitrageOpportunity> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.profit_percentage >= b.profit_percentage { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Total order: profit descending, then symbol, then exchanges, then id.
fn compare_opportunities(a: &ArbitrageOpportunity, b: &ArbitrageOpportunity) -> Ordering {
    b.profit_absolute
        .cmp(&a.profit_absolute)
        .then_with(|| a.token.symbol.cmp(&b.token.symbol))
        .then_with(|| a.buy_exchange.cmp(&b.buy_exchange))
        .then_with(|| a.sell_exchange.cmp(&b.sell_exchange))
        .then_with(|| a.id.cmp(&b.id))
}

/// The widest cross-exchange spread for a token, profitable or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadDiagnosis {
    /// Exchange with the lowest ask.
    pub buy_exchange: ExchangeId,
    /// Exchange with the highest bid.
    pub sell_exchange: ExchangeId,
    /// Lowest ask.
    pub best_ask: Decimal,
    /// Highest bid.
    pub best_bid: Decimal,
    /// Spread as a percentage of the ask (may be negative).
    pub spread_pct: Decimal,
}

impl std::fmt::Display for SpreadDiagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buy {}@{} -> sell {}@{} = {}%",
            self.buy_exchange,
            self.best_ask,
            self.sell_exchange,
            self.best_bid,
            self.spread_pct.round_dp(4),
        )
    }
}

/// Diagnose the best possible spread for a token across distinct exchanges.
pub fn best_spread(snapshot: &QuoteSnapshot, token: &Token) -> Option<SpreadDiagnosis> {
    let quotes: Vec<&ExchangeQuote> = snapshot
        .quotes_for(&token.address)
        .into_iter()
        .filter(|q| q.is_valid())
        .collect();

    quotes
        .iter()
        .flat_map(|buy| quotes.iter().map(move |sell| (*buy, *sell)))
        .filter(|(buy, sell)| buy.exchange != sell.exchange)
        .filter_map(|(buy, sell)| {
            Some(SpreadDiagnosis {
                buy_exchange: buy.exchange.clone(),
                sell_exchange: sell.exchange.clone(),
                best_ask: buy.ask,
                best_bid: sell.bid,
                spread_pct: profit_percentage(buy.ask, sell.bid)?,
            })
        })
        .max_by(|a, b| a.spread_pct.cmp(&b.spread_pct))
}
