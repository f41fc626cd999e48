//! Executors perform the single external action behind an execution.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use url::Url;

use super::types::{ExecutionReceipt, ExecutionTarget, TargetKind};
use crate::error::ExecutionError;

/// Performs one external action per call. Never retries.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short name for logs and status.
    fn name(&self) -> &'static str;

    /// Perform the action for `target`.
    async fn execute(&self, target: &ExecutionTarget) -> Result<ExecutionReceipt, ExecutionError>;
}

/// Dry-run executor that fabricates transaction references.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    latency: Duration,
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl SimulatedExecutor {
    /// Create an executor that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate settlement latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Toggle failure mode.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of actions attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// 32-byte looking reference derived from the target and the clock.
fn simulated_tx_ref(target_id: &str, nonce: usize) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let bytes: Vec<u8> = (0u8..4)
        .flat_map(|lane| {
            let mut hasher = DefaultHasher::new();
            (target_id, nonce, now, lane).hash(&mut hasher);
            hasher.finish().to_be_bytes()
        })
        .collect();
    format!("0x{}", hex::encode(bytes))
}

#[async_trait]
impl Executor for SimulatedExecutor {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn execute(&self, target: &ExecutionTarget) -> Result<ExecutionReceipt, ExecutionError> {
        let nonce = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(ExecutionError::Failed {
                target_id: target.id().to_string(),
                reason: "simulated failure".to_string(),
            });
        }

        let realized_profit = match target {
            ExecutionTarget::Opportunity(opp) => Some(opp.profit_absolute),
            ExecutionTarget::Order(_) => None,
        };

        let tx_ref = simulated_tx_ref(target.id(), nonce);
        debug!(target_id = %target.id(), tx_ref = %tx_ref, "[DRY RUN] Simulated execution");

        Ok(ExecutionReceipt {
            tx_ref,
            realized_profit,
        })
    }
}

/// Request body posted to an execution endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    /// Target id.
    pub target_id: String,
    /// Target kind.
    pub kind: TargetKind,
    /// Token sold / bought first.
    pub token_in: String,
    /// Token received.
    pub token_out: String,
    /// Amount (USD capital for opportunities, token amount for orders).
    pub amount: Decimal,
    /// Venue to buy on (opportunities only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_exchange: Option<String>,
    /// Venue to sell on (opportunities only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sell_exchange: Option<String>,
    /// Lowest acceptable output (orders only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_received: Option<Decimal>,
}

impl ExecutionRequest {
    /// Build the request for a target.
    pub fn from_target(target: &ExecutionTarget) -> Self {
        match target {
            ExecutionTarget::Opportunity(opp) => Self {
                target_id: opp.id.clone(),
                kind: TargetKind::Opportunity,
                token_in: opp.token.address.clone(),
                token_out: opp.token.address.clone(),
                amount: opp.required_capital,
                buy_exchange: Some(opp.buy_exchange.to_string()),
                sell_exchange: Some(opp.sell_exchange.to_string()),
                min_received: None,
            },
            ExecutionTarget::Order(triggered) => Self {
                target_id: triggered.order.order_id.clone(),
                kind: TargetKind::Order,
                token_in: triggered.quote.from_token.clone(),
                token_out: triggered.quote.to_token.clone(),
                amount: triggered.quote.from_amount,
                buy_exchange: None,
                sell_exchange: None,
                min_received: Some(triggered.quote.min_received),
            },
        }
    }
}

/// Response from an execution endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionResponse {
    /// Success flag.
    pub success: bool,
    /// Transaction reference.
    #[serde(default, alias = "txHash", alias = "tx_hash", alias = "txRef")]
    pub tx_ref: Option<String>,
    /// Realized profit.
    #[serde(default)]
    pub profit: Option<Decimal>,
    /// Error message if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// Executor that posts each action to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    url: Url,
    http: reqwest::Client,
}

impl HttpExecutor {
    /// Create an executor posting to `url`.
    pub fn new(url: Url, http: reqwest::Client) -> Self {
        Self { url, http }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, target), fields(target_id = %target.id()))]
    async fn execute(&self, target: &ExecutionTarget) -> Result<ExecutionReceipt, ExecutionError> {
        let failed = |reason: String| ExecutionError::Failed {
            target_id: target.id().to_string(),
            reason,
        };

        let response = self
            .http
            .post(self.url.clone())
            .json(&ExecutionRequest::from_target(target))
            .send()
            .await
            .map_err(|e| failed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {} - {}", status, body)));
        }

        let result: ExecutionResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("failed to parse response: {}", e)))?;

        parse_response(target, result)
    }
}

fn parse_response(
    target: &ExecutionTarget,
    response: ExecutionResponse,
) -> Result<ExecutionReceipt, ExecutionError> {
    if !response.success {
        return Err(ExecutionError::Failed {
            target_id: target.id().to_string(),
            reason: response
                .error
                .unwrap_or_else(|| "endpoint reported failure".to_string()),
        });
    }

    let tx_ref = response.tx_ref.ok_or_else(|| ExecutionError::Failed {
        target_id: target.id().to_string(),
        reason: "no transaction reference in response".to_string(),
    })?;

    info!(target_id = %target.id(), tx_ref = %tx_ref, "Execution confirmed");
    Ok(ExecutionReceipt {
        tx_ref,
        realized_profit: response.profit,
    })
}
