//! Execution dispatcher with at-most-one in-flight execution per target.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::executor::Executor;
use super::types::{ExecutionResult, ExecutionTarget, ExecutorStats};
use crate::error::ExecutionError;
use crate::metrics;

/// Completed results kept for the status surface.
const RECENT_RESULTS: usize = 100;

/// In-flight ids plus a wakeup for callers waiting on an empty registry.
#[derive(Debug, Default)]
struct InFlight {
    ids: DashMap<String, Instant>,
    idle: Notify,
}

/// Removes its id from the registry when the execution task finishes.
struct InFlightGuard {
    registry: Arc<InFlight>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.ids.remove(&self.id);
        if self.registry.ids.is_empty() {
            self.registry.idle.notify_waiters();
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    stats: ExecutorStats,
    recent: VecDeque<ExecutionResult>,
}

/// Turns opportunities and triggered orders into execution attempts.
///
/// Each accepted call runs on its own task: the caller may stop waiting
/// but the external action still runs to completion or timeout.
#[derive(Clone)]
pub struct ExecutionDispatcher {
    executor: Arc<dyn Executor>,
    in_flight: Arc<InFlight>,
    timeout: Duration,
    outcomes: broadcast::Sender<ExecutionResult>,
    ledger: Arc<Mutex<Ledger>>,
}

impl std::fmt::Debug for ExecutionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDispatcher")
            .field("executor", &self.executor.name())
            .field("in_flight", &self.in_flight.ids.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ExecutionDispatcher {
    /// Create a dispatcher with a per-execution timeout.
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        let (outcomes, _) = broadcast::channel(256);
        Self {
            executor,
            in_flight: Arc::new(InFlight::default()),
            timeout,
            outcomes,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    /// Name of the underlying executor.
    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Execute a target and wait for its outcome.
    ///
    /// A second call for an id that is still outstanding fails fast with
    /// `AlreadyInFlight`. Failures of the external action are returned
    /// as `Failed` or `Timeout` and are never retried.
    pub async fn execute(&self, target: ExecutionTarget) -> Result<ExecutionResult, ExecutionError> {
        let target_id = target.id().to_string();
        let handle = self.dispatch(target)?;
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(ExecutionError::Failed {
                target_id,
                reason: format!("execution task aborted: {}", e),
            }),
        }
    }

    /// Accept a target and start its execution without waiting.
    ///
    /// The returned handle may be dropped; the execution keeps running.
    #[instrument(skip(self, target), fields(target_id = %target.id(), kind = %target.kind()))]
    pub fn dispatch(
        &self,
        target: ExecutionTarget,
    ) -> Result<JoinHandle<Result<ExecutionResult, ExecutionError>>, ExecutionError> {
        let guard = self.claim(target.id())?;
        self.lock_ledger().stats.attempts += 1;

        let dispatcher = self.clone();
        Ok(tokio::spawn(async move {
            let outcome = dispatcher.run(&target).await;
            drop(guard);
            outcome
        }))
    }

    async fn run(&self, target: &ExecutionTarget) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();
        let kind = target.kind().as_label();

        let outcome = match tokio::time::timeout(self.timeout, self.executor.execute(target)).await {
            Ok(Ok(receipt)) => Ok(ExecutionResult::succeeded(target, receipt)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ExecutionError::Timeout {
                target_id: target.id().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        metrics::record_execution_latency(start, kind);

        let result = match &outcome {
            Ok(result) => {
                metrics::inc_executions_succeeded(kind);
                info!(
                    target_id = %result.target_id,
                    tx_ref = ?result.tx_ref,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Execution succeeded"
                );
                result.clone()
            }
            Err(err) => {
                metrics::inc_executions_failed(kind);
                warn!(target_id = %target.id(), error = %err, "Execution failed");
                ExecutionResult::failed(target, err.to_string())
            }
        };

        {
            let mut ledger = self.lock_ledger();
            ledger.stats.record(&result);
            if ledger.recent.len() == RECENT_RESULTS {
                ledger.recent.pop_front();
            }
            ledger.recent.push_back(result.clone());
        }

        // No subscribers is fine.
        let _ = self.outcomes.send(result);
        outcome
    }

    fn claim(&self, id: &str) -> Result<InFlightGuard, ExecutionError> {
        match self.in_flight.ids.entry(id.to_string()) {
            Entry::Occupied(_) => {
                self.lock_ledger().stats.rejected += 1;
                metrics::inc_executions_rejected();
                warn!(target_id = %id, "Execution already in flight, rejecting");
                Err(ExecutionError::AlreadyInFlight {
                    target_id: id.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(InFlightGuard {
                    registry: Arc::clone(&self.in_flight),
                    id: id.to_string(),
                })
            }
        }
    }

    /// Whether an execution for `id` is outstanding.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.ids.contains_key(id)
    }

    /// Number of outstanding executions.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.ids.len()
    }

    /// Wait until no execution is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.ids.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Subscribe to execution outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionResult> {
        self.outcomes.subscribe()
    }

    /// Snapshot of the running statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.lock_ledger().stats.clone()
    }

    /// Most recent results, newest first.
    pub fn recent_results(&self, limit: usize) -> Vec<ExecutionResult> {
        self.lock_ledger().recent.iter().rev().take(limit).cloned().collect()
    }

    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{ArbitrageOpportunity, ConfidenceTier};
    use crate::execution::SimulatedExecutor;
    use crate::feed::ExchangeId;
    use crate::token::BASE_TOKENS;
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;

    fn target(sell: &str) -> ExecutionTarget {
        let token = BASE_TOKENS[0].clone();
        let buy = ExchangeId::new("uniswap-v3");
        let sell = ExchangeId::new(sell);
        ExecutionTarget::Opportunity(ArbitrageOpportunity {
            id: ArbitrageOpportunity::make_id(&token, &buy, &sell),
            token,
            buy_exchange: buy,
            sell_exchange: sell,
            buy_price: dec!(2456.78),
            sell_price: dec!(2478.92),
            profit_absolute: dec!(89.6),
            profit_percentage: dec!(0.9),
            required_capital: dec!(10000),
            gas_estimate: dec!(0.5),
            confidence: ConfidenceTier::Medium,
            detected_at: OffsetDateTime::now_utc(),
        })
    }

    fn dispatcher(executor: SimulatedExecutor, timeout: Duration) -> ExecutionDispatcher {
        ExecutionDispatcher::new(Arc::new(executor), timeout)
    }

    #[tokio::test]
    async fn concurrent_calls_for_same_target_accept_exactly_one() {
        let executor = SimulatedExecutor::new().with_latency(Duration::from_millis(50));
        let dispatcher = dispatcher(executor.clone(), Duration::from_secs(1));

        let (a, b) = tokio::join!(
            dispatcher.execute(target("aerodrome")),
            dispatcher.execute(target("aerodrome"))
        );

        let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let rejected = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ExecutionError::AlreadyInFlight { .. })))
            .count();
        assert_eq!(oks, 1);
        assert_eq!(rejected, 1);
        assert_eq!(executor.calls(), 1);
        assert_eq!(dispatcher.stats().rejected, 1);
    }

    #[tokio::test]
    async fn id_is_released_after_completion() {
        let executor = SimulatedExecutor::new();
        let dispatcher = dispatcher(executor.clone(), Duration::from_secs(1));

        dispatcher.execute(target("aerodrome")).await.unwrap();
        assert!(!dispatcher.is_in_flight("weth:uniswap-v3:aerodrome"));

        executor.set_failing(true);
        let err = dispatcher.execute(target("aerodrome")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Failed { .. }));
        assert_eq!(dispatcher.in_flight_count(), 0);

        let stats = dispatcher.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.realized_profit, dec!(89.6));
    }

    #[tokio::test]
    async fn different_targets_run_concurrently() {
        let executor = SimulatedExecutor::new().with_latency(Duration::from_millis(20));
        let dispatcher = dispatcher(executor, Duration::from_secs(1));

        let (a, b) = tokio::join!(
            dispatcher.execute(target("aerodrome")),
            dispatcher.execute(target("baseswap"))
        );
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test]
    async fn slow_execution_times_out() {
        let executor = SimulatedExecutor::new().with_latency(Duration::from_millis(500));
        let dispatcher = dispatcher(executor, Duration::from_millis(20));

        let err = dispatcher.execute(target("aerodrome")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { timeout_ms: 20, .. }));
        assert_eq!(dispatcher.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_execution() {
        let executor = SimulatedExecutor::new().with_latency(Duration::from_millis(50));
        let dispatcher = dispatcher(executor.clone(), Duration::from_secs(1));

        let gave_up =
            tokio::time::timeout(Duration::from_millis(5), dispatcher.execute(target("aerodrome"))).await;
        assert!(gave_up.is_err());
        assert!(dispatcher.is_in_flight("weth:uniswap-v3:aerodrome"));

        dispatcher.wait_idle().await;
        let stats = dispatcher.stats();
        assert_eq!(stats.successes, 1);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn outcomes_are_broadcast() {
        let dispatcher = dispatcher(SimulatedExecutor::new(), Duration::from_secs(1));
        let mut outcomes = dispatcher.subscribe();

        dispatcher.execute(target("aerodrome")).await.unwrap();

        let result = outcomes.recv().await.unwrap();
        assert!(result.success);
        assert_eq!(result.target_id, "weth:uniswap-v3:aerodrome");
        assert_eq!(dispatcher.recent_results(10), vec![result]);
    }
}
