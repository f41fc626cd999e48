//! Unified error types for the arbitrage engine.

use thiserror::Error;

use crate::orders::OrderStatus;

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration validation error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Price feed error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Conditional order error.
    #[error("order error: {0}")]
    Order(#[from] OrderError),

    /// Execution dispatch error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Token registry error.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a single exchange feed during a scan cycle.
///
/// These never abort a cycle: the failing exchange is dropped from
/// that cycle's comparisons and the error is recorded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The exchange could not be reached or returned an error.
    #[error("feed {exchange} unavailable: {reason}")]
    Unavailable {
        /// Exchange that failed.
        exchange: String,
        /// Reason for failure.
        reason: String,
    },

    /// The exchange did not answer within its time box.
    #[error("feed {exchange} timed out after {timeout_ms}ms")]
    Timeout {
        /// Exchange that timed out.
        exchange: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The exchange answered with data we could not interpret.
    #[error("feed {exchange} returned malformed data: {reason}")]
    Malformed {
        /// Exchange that misbehaved.
        exchange: String,
        /// What was wrong.
        reason: String,
    },
}

impl FeedError {
    /// Exchange the error belongs to.
    pub fn exchange(&self) -> &str {
        match self {
            FeedError::Unavailable { exchange, .. }
            | FeedError::Timeout { exchange, .. }
            | FeedError::Malformed { exchange, .. } => exchange,
        }
    }
}

/// Conditional order errors, surfaced verbatim to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// No order with this id exists.
    #[error("order {order_id} not found")]
    NotFound {
        /// Requested order id.
        order_id: String,
    },

    /// The order is already filled or cancelled.
    #[error("order {order_id} is already {status}")]
    AlreadyTerminal {
        /// Order id.
        order_id: String,
        /// Terminal status the order is in.
        status: OrderStatus,
    },

    /// A trigger and a cancellation raced; the other transition won.
    #[error("order {order_id} is being {winner} concurrently")]
    Conflict {
        /// Order id.
        order_id: String,
        /// The transition that was committed first.
        winner: &'static str,
    },

    /// Submitted order parameters are invalid.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// A token in the order is not in the registry.
    #[error("unknown token: {0}")]
    UnknownToken(String),
}

/// Execution dispatch errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Another execution for the same target is still outstanding.
    #[error("execution for {target_id} already in flight")]
    AlreadyInFlight {
        /// Target id (opportunity id or order id).
        target_id: String,
    },

    /// The external action reported failure.
    #[error("execution of {target_id} failed: {reason}")]
    Failed {
        /// Target id.
        target_id: String,
        /// Failure reason.
        reason: String,
    },

    /// The external action did not complete within its time box.
    #[error("execution of {target_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target id.
        target_id: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The requested opportunity is not in the current snapshot.
    #[error("no current opportunity with id {0}")]
    UnknownTarget(String),
}

/// Token registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Address is not `0x` followed by 40 hex digits.
    #[error("invalid token address: {0}")]
    InvalidAddress(String),

    /// A token with this address is already registered.
    #[error("token {0} already registered")]
    Duplicate(String),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_error_reports_exchange() {
        let err = FeedError::Timeout {
            exchange: "aerodrome".to_string(),
            timeout_ms: 3000,
        };
        assert_eq!(err.exchange(), "aerodrome");
        assert_eq!(err.to_string(), "feed aerodrome timed out after 3000ms");
    }

    #[test]
    fn order_error_messages_are_user_readable() {
        let err = OrderError::AlreadyTerminal {
            order_id: "ord-1".to_string(),
            status: OrderStatus::Filled,
        };
        assert_eq!(err.to_string(), "order ord-1 is already filled");

        let wrapped: AppError = err.into();
        assert!(wrapped.to_string().starts_with("order error:"));
    }
}
