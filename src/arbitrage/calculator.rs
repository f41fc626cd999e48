//! Profit, capital and confidence calculations for arbitrage opportunities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::config::Config;
use crate::feed::{ExchangeId, ExchangeQuote};
use crate::token::Token;

/// How much to trust an opportunity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConfidenceTier {
    /// Stale or marginal.
    Low,
    /// Above threshold with fresh quotes.
    Medium,
    /// At least twice the threshold with fresh quotes.
    High,
}

/// Gas price tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GasSpeed {
    /// Base price.
    #[default]
    Standard,
    /// 1.2x base price.
    Fast,
    /// 1.5x base price.
    Instant,
}

impl GasSpeed {
    /// Multiplier applied to the base gas price.
    pub fn multiplier(&self) -> Decimal {
        match self {
            GasSpeed::Standard => Decimal::ONE,
            GasSpeed::Fast => Decimal::new(12, 1),
            GasSpeed::Instant => Decimal::new(15, 1),
        }
    }
}

/// Gas cost model for a two-leg arbitrage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasModel {
    /// Gas units consumed.
    pub units: u64,
    /// Base gas price in gwei.
    pub price_gwei: Decimal,
    /// Speed tier.
    pub speed: GasSpeed,
}

impl GasModel {
    /// Build the gas model from config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            units: config.gas_units_per_arbitrage,
            price_gwei: config.gas_price_gwei,
            speed: config.gas_speed,
        }
    }

    /// Gas cost in native units (ETH).
    pub fn cost_native(&self) -> Decimal {
        // gwei -> ETH is 1e-9
        Decimal::from(self.units)
            .saturating_mul(self.price_gwei)
            .saturating_mul(self.speed.multiplier())
            * Decimal::new(1, 9)
    }

    /// Gas cost converted to USD at the given ETH price.
    pub fn cost_usd(&self, native_usd: Decimal) -> Decimal {
        self.cost_native().saturating_mul(native_usd)
    }
}

/// Inputs to opportunity detection for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionParams {
    /// Minimum profit percentage (ARBITRAGE_MIN_PROFIT).
    pub min_profit_pct: Decimal,
    /// Capital cap per opportunity (ARBITRAGE_MAX_CAPITAL).
    pub max_capital: Decimal,
    /// Quotes younger than this are fresh (one scan interval).
    pub freshness_window: time::Duration,
    /// Estimated gas cost in USD.
    pub gas_cost_usd: Decimal,
}

impl DetectionParams {
    /// Build params from config with a gas cost already converted to USD.
    pub fn from_config(config: &Config, gas_cost_usd: Decimal) -> Self {
        Self {
            min_profit_pct: config.min_profit_pct,
            max_capital: config.max_capital,
            freshness_window: time::Duration::seconds(config.scan_interval_secs as i64),
            gas_cost_usd,
        }
    }
}

/// Detected cross-exchange arbitrage opportunity.
///
/// Recomputed from scratch every scan cycle; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrageOpportunity {
    /// Deterministic id: `symbol:buy:sell`.
    pub id: String,
    /// Token being arbitraged.
    pub token: Token,
    /// Exchange to buy on (lower ask).
    pub buy_exchange: ExchangeId,
    /// Exchange to sell on (higher bid).
    pub sell_exchange: ExchangeId,
    /// Ask on the buy exchange.
    pub buy_price: Decimal,
    /// Bid on the sell exchange.
    pub sell_price: Decimal,
    /// Expected profit in USD after gas.
    pub profit_absolute: Decimal,
    /// Gross profit percentage.
    pub profit_percentage: Decimal,
    /// Capital deployed (USD).
    pub required_capital: Decimal,
    /// Estimated gas cost in USD.
    pub gas_estimate: Decimal,
    /// Confidence tier.
    pub confidence: ConfidenceTier,
    /// When the opportunity was computed.
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
}

impl ArbitrageOpportunity {
    /// Deterministic id for a token and exchange pair.
    pub fn make_id(token: &Token, buy: &ExchangeId, sell: &ExchangeId) -> String {
        format!("{}:{}:{}", token.symbol.to_lowercase(), buy, sell)
    }

    /// Return on capital after gas.
    pub fn roi(&self) -> Decimal {
        self.profit_absolute
            .checked_div(self.required_capital)
            .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Percentage gained buying at `buy` and selling at `sell`.
///
/// `None` when `buy` is zero or the result is not representable.
pub fn profit_percentage(buy: Decimal, sell: Decimal) -> Option<Decimal> {
    sell.checked_sub(buy)?
        .checked_div(buy)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

/// Confidence tier from profit percentage and quote freshness.
pub fn confidence_tier(profit_pct: Decimal, min_profit_pct: Decimal, fresh: bool) -> ConfidenceTier {
    if !fresh || profit_pct < min_profit_pct {
        ConfidenceTier::Low
    } else if profit_pct >= min_profit_pct * Decimal::TWO {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Medium
    }
}

/// Capital to deploy: the cap, limited by whatever liquidity is known.
pub fn required_capital(
    max_capital: Decimal,
    buy_liquidity: Option<Decimal>,
    sell_liquidity: Option<Decimal>,
) -> Decimal {
    [buy_liquidity, sell_liquidity]
        .into_iter()
        .flatten()
        .fold(max_capital, Decimal::min)
        .max(Decimal::ZERO)
}

/// Evaluate buying on `buy` and selling on `sell`.
///
/// Returns `None` unless the sell bid is strictly above the buy ask and
/// the profit percentage meets the threshold.
pub fn calculate_opportunity(
    token: &Token,
    buy: &ExchangeQuote,
    sell: &ExchangeQuote,
    params: &DetectionParams,
    now: OffsetDateTime,
) -> Option<ArbitrageOpportunity> {
    if buy.exchange == sell.exchange || !buy.is_valid() || !sell.is_valid() {
        return None;
    }

    let buy_price = buy.ask;
    let sell_price = sell.bid;
    if buy_price >= sell_price {
        return None;
    }

    let profit_pct = profit_percentage(buy_price, sell_price)?;
    if profit_pct < params.min_profit_pct {
        return None;
    }

    let capital = required_capital(params.max_capital, buy.liquidity_usd, sell.liquidity_usd);
    let gross = capital.checked_mul(profit_pct)? / Decimal::ONE_HUNDRED;
    let profit_absolute = gross.checked_sub(params.gas_cost_usd)?;
    let fresh = buy.is_fresh(now, params.freshness_window) && sell.is_fresh(now, params.freshness_window);

    Some(ArbitrageOpportunity {
        id: ArbitrageOpportunity::make_id(token, &buy.exchange, &sell.exchange),
        token: token.clone(),
        buy_exchange: buy.exchange.clone(),
        sell_exchange: sell.exchange.clone(),
        buy_price,
        sell_price,
        profit_absolute,
        profit_percentage: profit_pct,
        required_capital: capital,
        gas_estimate: params.gas_cost_usd,
        confidence: confidence_tier(profit_pct, params.min_profit_pct, fresh),
        detected_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::BASE_TOKENS;
    use rust_decimal_macros::dec;

    fn params(min: Decimal) -> DetectionParams {
        DetectionParams {
            min_profit_pct: min,
            max_capital: dec!(10000),
            freshness_window: time::Duration::seconds(15),
            gas_cost_usd: dec!(0.5),
        }
    }

    fn quote(exchange: &str, bid: Decimal, ask: Decimal, at: OffsetDateTime) -> ExchangeQuote {
        ExchangeQuote::new(exchange, BASE_TOKENS[0].address.clone(), bid, ask, at)
    }

    #[test]
    fn profit_percentage_matches_reference() {
        let pct = profit_percentage(dec!(2456.78), dec!(2478.92)).unwrap();
        assert!(pct > dec!(0.90) && pct < dec!(0.91));
        assert_eq!(profit_percentage(dec!(0), dec!(1)), None);
    }

    #[test]
    fn confidence_tiers() {
        assert_eq!(confidence_tier(dec!(0.9), dec!(0.5), true), ConfidenceTier::Medium);
        assert_eq!(confidence_tier(dec!(0.9), dec!(0.4), true), ConfidenceTier::High);
        assert_eq!(confidence_tier(dec!(1.0), dec!(0.5), true), ConfidenceTier::High);
        assert_eq!(confidence_tier(dec!(5.0), dec!(0.5), false), ConfidenceTier::Low);
        assert_eq!(confidence_tier(dec!(0.3), dec!(0.5), true), ConfidenceTier::Low);
    }

    #[test]
    fn gas_model_converts_to_usd() {
        let gas = GasModel {
            units: 300_000,
            price_gwei: dec!(0.05),
            speed: GasSpeed::Fast,
        };
        // 300k * 0.05 gwei * 1.2 = 18_000 gwei = 0.000018 ETH
        assert_eq!(gas.cost_native(), dec!(0.000018));
        assert_eq!(gas.cost_usd(dec!(2500)), dec!(0.045));
    }

    #[test]
    fn required_capital_is_capped_by_liquidity() {
        assert_eq!(required_capital(dec!(10000), None, None), dec!(10000));
        assert_eq!(required_capital(dec!(10000), Some(dec!(4000)), Some(dec!(6000))), dec!(4000));
        assert_eq!(required_capital(dec!(10000), None, Some(dec!(50000))), dec!(10000));
    }

    #[test]
    fn calculate_opportunity_when_profitable() {
        let now = OffsetDateTime::now_utc();
        let buy = quote("uniswap-v3", dec!(2455.00), dec!(2456.78), now);
        let sell = quote("aerodrome", dec!(2478.92), dec!(2480.50), now);

        let opp = calculate_opportunity(&BASE_TOKENS[0], &buy, &sell, &params(dec!(0.5)), now).unwrap();

        assert_eq!(opp.id, "weth:uniswap-v3:aerodrome");
        assert_eq!(opp.buy_price, dec!(2456.78));
        assert_eq!(opp.sell_price, dec!(2478.92));
        assert_eq!(opp.required_capital, dec!(10000));
        assert_eq!(opp.confidence, ConfidenceTier::Medium);
        // 10000 * ~0.9012% - 0.5 gas
        assert!(opp.profit_absolute > dec!(89.5) && opp.profit_absolute < dec!(90.0));
        assert!(opp.roi() > dec!(0.89));
    }

    #[test]
    fn calculate_opportunity_rejects_wrong_direction_and_thin_spreads() {
        let now = OffsetDateTime::now_utc();
        let cheap = quote("uniswap-v3", dec!(2455.00), dec!(2456.78), now);
        let rich = quote("aerodrome", dec!(2478.92), dec!(2480.50), now);

        // Buying on the expensive venue is never an opportunity.
        assert!(calculate_opportunity(&BASE_TOKENS[0], &rich, &cheap, &params(dec!(0.5)), now).is_none());
        // 0.9% does not clear a 1% threshold.
        assert!(calculate_opportunity(&BASE_TOKENS[0], &cheap, &rich, &params(dec!(1.0)), now).is_none());
    }

    #[test]
    fn stale_quotes_lower_confidence() {
        let now = OffsetDateTime::now_utc();
        let old = now - time::Duration::seconds(60);
        let buy = quote("uniswap-v3", dec!(2455.00), dec!(2456.78), old);
        let sell = quote("aerodrome", dec!(2478.92), dec!(2480.50), now);

        let opp = calculate_opportunity(&BASE_TOKENS[0], &buy, &sell, &params(dec!(0.4)), now).unwrap();
        assert_eq!(opp.confidence, ConfidenceTier::Low);
    }

    #[test]
    fn gas_speed_parses_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(GasSpeed::from_str("fast").unwrap(), GasSpeed::Fast);
        assert_eq!(GasSpeed::from_str("INSTANT").unwrap(), GasSpeed::Instant);
        assert_eq!(GasSpeed::Instant.multiplier(), dec!(1.5));
    }

    #[test]
    fn extreme_quotes_are_skipped_not_fatal() {
        let now = OffsetDateTime::now_utc();
        let dust = quote("uniswap-v3", Decimal::new(1, 28), Decimal::new(1, 28), now);
        let rich = quote("aerodrome", dec!(1000000000000), dec!(1000000000001), now);
        // Spread percentage itself is not representable.
        assert!(calculate_opportunity(&BASE_TOKENS[0], &dust, &rich, &params(dec!(0.5)), now).is_none());

        // Representable spread, but capital times spread is not.
        let cheap = quote("uniswap-v3", dec!(0.0000000001), dec!(0.0000000001), now);
        let big = DetectionParams {
            max_capital: dec!(10000000000),
            ..params(dec!(0.5))
        };
        assert!(calculate_opportunity(&BASE_TOKENS[0], &cheap, &rich, &big, now).is_none());
    }
}
