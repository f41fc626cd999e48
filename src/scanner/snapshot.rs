//! Published scan results and scheduler state.

use std::sync::Arc;

use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;

use crate::arbitrage::ArbitrageOpportunity;
use crate::error::FeedError;
use crate::feed::QuoteSnapshot;

/// Scan scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanState {
    /// Waiting for the next tick or request.
    Idle,
    /// A pass is running.
    Scanning,
    /// Shut down; terminal.
    Stopped,
}

/// Outcome of a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanRequest {
    /// A new pass will start.
    Triggered,
    /// Merged into a pass that is running or already requested.
    Coalesced,
    /// The scheduler has stopped.
    Stopped,
}

/// Immutable result of one scan pass.
///
/// Replaced as a whole at the end of every pass. A failed pass carries
/// the previous opportunities and quotes forward with `last_error` set.
#[derive(Debug, Clone, Default)]
pub struct ScanSnapshot {
    /// Number of passes completed, including failed ones.
    pub version: u64,
    /// Time of the last successful pass.
    pub scanned_at: Option<OffsetDateTime>,
    /// Time of the last attempted pass.
    pub attempted_at: Option<OffsetDateTime>,
    /// Opportunities, sorted by profit descending.
    pub opportunities: Arc<Vec<ArbitrageOpportunity>>,
    /// Quotes the opportunities were computed from.
    pub quotes: Arc<QuoteSnapshot>,
    /// Exchanges dropped during the last pass.
    pub feed_errors: Vec<FeedError>,
    /// Error of the last pass, if it failed.
    pub last_error: Option<String>,
    /// Orders triggered during the last pass.
    pub triggered_orders: Vec<String>,
}

impl ScanSnapshot {
    /// Top `limit` opportunities, or all of them.
    pub fn top(&self, limit: Option<usize>) -> Vec<ArbitrageOpportunity> {
        let take = limit.unwrap_or(self.opportunities.len());
        self.opportunities.iter().take(take).cloned().collect()
    }

    /// Find an opportunity by id.
    pub fn opportunity(&self, id: &str) -> Option<&ArbitrageOpportunity> {
        self.opportunities.iter().find(|o| o.id == id)
    }

    /// Whether the last pass failed.
    pub fn is_stale(&self) -> bool {
        self.last_error.is_some()
    }
}
