//! Conditional order types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Conditional order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum OrderType {
    /// Triggers when the realizable price rises to the trigger or above.
    Limit,
    /// Triggers when the realizable price falls to the trigger or below.
    #[serde(alias = "stop_loss", alias = "stoploss")]
    #[strum(to_string = "stop-loss", serialize = "stop_loss", serialize = "stoploss")]
    StopLoss,
}

impl OrderType {
    /// Whether an order of this type fires at `price` for `trigger`.
    pub fn is_triggered(&self, price: Decimal, trigger: Decimal) -> bool {
        match self {
            OrderType::Limit => price >= trigger,
            OrderType::StopLoss => price <= trigger,
        }
    }

    /// Static label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::StopLoss => "stop-loss",
        }
    }
}

/// Order status. `Filled` and `Cancelled` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderStatus {
    /// Waiting for its trigger.
    Active,
    /// Triggered and handed to execution.
    Filled,
    /// Cancelled by the user.
    #[strum(to_string = "cancelled", serialize = "canceled")]
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// A user's limit or stop-loss order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeOrder {
    /// Unique order id.
    pub order_id: String,
    /// Owner.
    pub user_id: String,
    /// Token sold (lowercase address).
    pub from_token: String,
    /// Token bought (lowercase address).
    pub to_token: String,
    /// Amount of `from_token` to sell.
    pub amount: Decimal,
    /// Limit or stop-loss.
    pub order_type: OrderType,
    /// Price of `to_token` per `from_token` that fires the order.
    pub trigger_price: Decimal,
    /// Slippage tolerance in percent.
    pub slippage_pct: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Realizable price at the moment the order filled.
    pub fill_price: Option<Decimal>,
    /// Submission time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last status change.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Order submission parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewOrder {
    /// Owner; defaults to "anonymous".
    #[serde(default = "default_user")]
    pub user_id: String,
    /// Token sold: address or symbol.
    pub from_token: String,
    /// Token bought: address or symbol.
    pub to_token: String,
    /// Amount of `from_token`.
    pub amount: Decimal,
    /// Limit or stop-loss.
    pub order_type: OrderType,
    /// Trigger price (to per from).
    pub trigger_price: Decimal,
    /// Slippage tolerance; the configured default when absent.
    #[serde(default)]
    pub slippage_pct: Option<Decimal>,
}

fn default_user() -> String {
    "anonymous".to_string()
}

impl NewOrder {
    /// Create a limit order request.
    pub fn limit(
        from_token: impl Into<String>,
        to_token: impl Into<String>,
        amount: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            user_id: default_user(),
            from_token: from_token.into(),
            to_token: to_token.into(),
            amount,
            order_type: OrderType::Limit,
            trigger_price,
            slippage_pct: None,
        }
    }

    /// Create a stop-loss order request.
    pub fn stop_loss(
        from_token: impl Into<String>,
        to_token: impl Into<String>,
        amount: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::StopLoss,
            ..Self::limit(from_token, to_token, amount, trigger_price)
        }
    }

    /// Set slippage tolerance.
    pub fn with_slippage(mut self, slippage_pct: Decimal) -> Self {
        self.slippage_pct = Some(slippage_pct);
        self
    }
}

/// Status filter for order listings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderFilter {
    /// Every order.
    #[default]
    All,
    /// Active only.
    Active,
    /// Filled only.
    Filled,
    /// Cancelled only.
    Cancelled,
}

impl OrderFilter {
    /// Whether an order with `status` passes the filter.
    pub fn matches(&self, status: OrderStatus) -> bool {
        match self {
            OrderFilter::All => true,
            OrderFilter::Active => status == OrderStatus::Active,
            OrderFilter::Filled => status == OrderStatus::Filled,
            OrderFilter::Cancelled => status == OrderStatus::Cancelled,
        }
    }
}

/// Sort key for order listings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderSort {
    /// Newest first.
    #[default]
    Date,
    /// Largest amount first.
    Amount,
    /// Active, then filled, then cancelled.
    Status,
}

/// Quote for swapping a triggered order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapQuote {
    /// Order being filled.
    pub order_id: String,
    /// Token sold.
    pub from_token: String,
    /// Token bought.
    pub to_token: String,
    /// Amount sold.
    pub from_amount: Decimal,
    /// Expected amount bought.
    pub to_amount: Decimal,
    /// Realizable price (to per from).
    pub price: Decimal,
    /// Lowest acceptable amount after slippage.
    pub min_received: Decimal,
    /// Slippage tolerance in percent.
    pub slippage_pct: Decimal,
    /// Token path.
    pub route: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn trigger_directions() {
        assert!(OrderType::Limit.is_triggered(dec!(1.1), dec!(1.0)));
        assert!(OrderType::Limit.is_triggered(dec!(1.0), dec!(1.0)));
        assert!(!OrderType::Limit.is_triggered(dec!(0.9), dec!(1.0)));

        assert!(OrderType::StopLoss.is_triggered(dec!(0.0004), dec!(0.0004)));
        assert!(OrderType::StopLoss.is_triggered(dec!(0.0003), dec!(0.0004)));
        assert!(!OrderType::StopLoss.is_triggered(dec!(0.00041), dec!(0.0004)));
    }

    #[test]
    fn order_type_strings() {
        assert_eq!(OrderType::StopLoss.to_string(), "stop-loss");
        assert_eq!(OrderType::from_str("STOP-LOSS").unwrap(), OrderType::StopLoss);
        assert_eq!(OrderType::from_str("stop_loss").unwrap(), OrderType::StopLoss);
        assert_eq!(
            serde_json::to_string(&OrderType::StopLoss).unwrap(),
            "\"stop-loss\""
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!OrderStatus::Active.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert_eq!(OrderStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn filter_matches_status() {
        assert!(OrderFilter::All.matches(OrderStatus::Cancelled));
        assert!(OrderFilter::Active.matches(OrderStatus::Active));
        assert!(!OrderFilter::Active.matches(OrderStatus::Filled));
        assert_eq!(OrderFilter::from_str("Filled").unwrap(), OrderFilter::Filled);
    }

    #[test]
    fn new_order_deserializes_with_defaults() {
        let json = r#"{
            "from_token": "DAI",
            "to_token": "WETH",
            "amount": "1000",
            "order_type": "stop-loss",
            "trigger_price": "0.0004"
        }"#;
        let order: NewOrder = serde_json::from_str(json).unwrap();
        assert_eq!(order.user_id, "anonymous");
        assert_eq!(order.order_type, OrderType::StopLoss);
        assert_eq!(order.slippage_pct, None);
    }
}
