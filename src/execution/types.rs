//! Execution targets, results and statistics.

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;

use crate::arbitrage::ArbitrageOpportunity;
use crate::orders::TriggeredOrder;

/// What an execution acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// A detected arbitrage opportunity.
    Opportunity(ArbitrageOpportunity),
    /// A triggered conditional order.
    Order(TriggeredOrder),
}

impl ExecutionTarget {
    /// Identity used for in-flight de-duplication.
    pub fn id(&self) -> &str {
        match self {
            ExecutionTarget::Opportunity(opp) => &opp.id,
            ExecutionTarget::Order(triggered) => triggered.order_id(),
        }
    }

    /// Kind of target.
    pub fn kind(&self) -> TargetKind {
        match self {
            ExecutionTarget::Opportunity(_) => TargetKind::Opportunity,
            ExecutionTarget::Order(_) => TargetKind::Order,
        }
    }
}

/// Kind of execution target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetKind {
    /// Arbitrage opportunity.
    Opportunity,
    /// Conditional order.
    Order,
}

impl TargetKind {
    /// Static label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TargetKind::Opportunity => "opportunity",
            TargetKind::Order => "order",
        }
    }
}

/// What an executor reports for a completed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    /// Transaction reference.
    pub tx_ref: String,
    /// Profit realized by the action, when known.
    pub realized_profit: Option<Decimal>,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Opportunity id or order id.
    pub target_id: String,
    /// Kind of target.
    pub kind: TargetKind,
    /// Whether the external action succeeded.
    pub success: bool,
    /// Transaction reference on success.
    pub tx_ref: Option<String>,
    /// Error description on failure.
    pub error: Option<String>,
    /// Profit realized, when known.
    pub realized_profit: Option<Decimal>,
    /// When the attempt finished.
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

impl ExecutionResult {
    /// Successful attempt.
    pub fn succeeded(target: &ExecutionTarget, receipt: ExecutionReceipt) -> Self {
        Self {
            target_id: target.id().to_string(),
            kind: target.kind(),
            success: true,
            tx_ref: Some(receipt.tx_ref),
            error: None,
            realized_profit: receipt.realized_profit,
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    /// Failed attempt.
    pub fn failed(target: &ExecutionTarget, error: impl Into<String>) -> Self {
        Self {
            target_id: target.id().to_string(),
            kind: target.kind(),
            success: false,
            tx_ref: None,
            error: Some(error.into()),
            realized_profit: None,
            completed_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Running execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Accepted execution attempts.
    pub attempts: u64,
    /// Successful attempts.
    pub successes: u64,
    /// Failed or timed-out attempts.
    pub failures: u64,
    /// Calls rejected as already in flight.
    pub rejected: u64,
    /// Sum of realized profit.
    pub realized_profit: Decimal,
}

impl ExecutorStats {
    /// Percentage of finished attempts that succeeded.
    pub fn success_rate(&self) -> Decimal {
        let finished = self.successes + self.failures;
        if finished == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.successes) * Decimal::ONE_HUNDRED / Decimal::from(finished)
    }

    /// Fold one result into the totals.
    pub fn record(&mut self, result: &ExecutionResult) {
        if result.success {
            self.successes += 1;
            if let Some(profit) = result.realized_profit {
                self.realized_profit = self.realized_profit.saturating_add(profit);
            }
        } else {
            self.failures += 1;
        }
    }
}
