//! Scan scheduler: drives fetch, detection and order evaluation.
//!
//! ```text
//! Idle ──tick / request──▶ Scanning ──publish──▶ Idle
//!   │                                              │
//!   └──────────────── shutdown ──▶ Stopped ◀───────┘
//! ```
//!
//! One pass runs at a time. Requests that arrive while a pass is running
//! are merged into it rather than starting a second pass.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::snapshot::{ScanRequest, ScanSnapshot, ScanState};
use crate::arbitrage::{detect_opportunities, DetectionParams, GasModel};
use crate::config::Config;
use crate::execution::{ExecutionDispatcher, ExecutionTarget};
use crate::feed::{PriceFeedAdapter, QuoteSnapshot};
use crate::metrics;
use crate::orders::OrderBook;
use crate::token::TokenRegistry;

/// Scheduler settings derived from config.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Time between scheduled passes.
    pub interval: Duration,
    /// Detection thresholds; `gas_cost_usd` is filled in per pass.
    pub detection: DetectionParams,
    /// Gas model for the per-pass gas estimate.
    pub gas: GasModel,
    /// ETH/USD used when the snapshot has no WETH price.
    pub native_usd_fallback: Decimal,
    /// Dispatch triggered orders automatically.
    pub auto_execute_orders: bool,
}

impl ScanSettings {
    /// Build settings from config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.scan_interval(),
            detection: DetectionParams::from_config(config, Decimal::ZERO),
            gas: GasModel::from_config(config),
            native_usd_fallback: config.native_usd_fallback,
            auto_execute_orders: config.auto_execute_orders,
        }
    }
}

/// Sets `Scanning` on entry and back to `Idle` when dropped.
struct ScanningGuard<'a> {
    state: &'a watch::Sender<ScanState>,
}

impl<'a> ScanningGuard<'a> {
    fn enter(state: &'a watch::Sender<ScanState>) -> Self {
        state.send_if_modified(|s| {
            if *s == ScanState::Stopped {
                false
            } else {
                *s = ScanState::Scanning;
                true
            }
        });
        Self { state }
    }
}

impl Drop for ScanningGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|s| {
            if *s == ScanState::Scanning {
                *s = ScanState::Idle;
                true
            } else {
                false
            }
        });
    }
}

/// Periodic and on-demand scan loop.
pub struct ScanScheduler {
    feeds: PriceFeedAdapter,
    tokens: Arc<TokenRegistry>,
    orders: Arc<OrderBook>,
    dispatcher: ExecutionDispatcher,
    settings: ScanSettings,
    gate: Mutex<()>,
    state: watch::Sender<ScanState>,
    snapshot: watch::Sender<Arc<ScanSnapshot>>,
    pending: AtomicBool,
    wake: Notify,
}

impl std::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanScheduler")
            .field("state", &*self.state.borrow())
            .field("version", &self.snapshot.borrow().version)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ScanScheduler {
    /// Create a scheduler in the `Idle` state with an empty snapshot.
    pub fn new(
        feeds: PriceFeedAdapter,
        tokens: Arc<TokenRegistry>,
        orders: Arc<OrderBook>,
        dispatcher: ExecutionDispatcher,
        settings: ScanSettings,
    ) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        let (snapshot, _) = watch::channel(Arc::new(ScanSnapshot::default()));
        Self {
            feeds,
            tokens,
            orders,
            dispatcher,
            settings,
            gate: Mutex::new(()),
            state,
            snapshot,
            pending: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> Arc<ScanSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Watch published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ScanSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Ask the run loop for a pass without waiting for it.
    pub fn request_scan(&self) -> ScanRequest {
        match self.state() {
            ScanState::Stopped => ScanRequest::Stopped,
            ScanState::Scanning => {
                metrics::inc_scans_coalesced();
                debug!("Scan requested while scanning, coalescing");
                ScanRequest::Coalesced
            }
            ScanState::Idle => {
                if self.pending.swap(true, Ordering::AcqRel) {
                    metrics::inc_scans_coalesced();
                    ScanRequest::Coalesced
                } else {
                    self.wake.notify_one();
                    ScanRequest::Triggered
                }
            }
        }
    }

    /// Run a pass now, or join the one already running.
    pub async fn scan_now(&self) -> Arc<ScanSnapshot> {
        let seen = self.snapshot.borrow().version;
        let gate = match self.gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                metrics::inc_scans_coalesced();
                debug!("Scan already in progress, waiting for it");
                let gate = self.gate.lock().await;
                let current = self.latest();
                if current.version > seen {
                    return current;
                }
                gate
            }
        };
        self.run_pass(gate).await
    }

    /// Drive passes on the interval and on request until `shutdown` resolves.
    ///
    /// A pass that is running when shutdown arrives completes first, and
    /// accepted executions are awaited before the scheduler stops.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.settings.interval.as_secs(), "Scan scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.wake.notified() => {
                    self.pending.store(false, Ordering::Release);
                    debug!("On-demand scan");
                }
                _ = ticker.tick() => debug!("Scheduled scan"),
            }
            // Outside the select so shutdown never interrupts a pass.
            self.scan_now().await;
        }

        let outstanding = self.dispatcher.in_flight_count();
        if outstanding > 0 {
            info!(outstanding, "Waiting for in-flight executions");
        }
        self.dispatcher.wait_idle().await;
        self.state.send_replace(ScanState::Stopped);
        info!("Scan scheduler stopped");
    }

    #[instrument(skip_all)]
    async fn run_pass(&self, _gate: MutexGuard<'_, ()>) -> Arc<ScanSnapshot> {
        let _timer = metrics::timer_scan();
        let _scanning = ScanningGuard::enter(&self.state);
        let previous = self.latest();

        let tokens = self.tokens.all();
        let cycle = self.feeds.fetch_quotes(&tokens).await;
        let now = OffsetDateTime::now_utc();

        if cycle.snapshot.is_empty() {
            let error = if cycle.failures.is_empty() {
                "no quotes received".to_string()
            } else {
                format!("all {} exchanges failed", cycle.failures.len())
            };
            warn!(error = %error, "Scan pass failed, keeping previous snapshot");
            metrics::inc_scans_failed();

            let failed = Arc::new(ScanSnapshot {
                version: previous.version + 1,
                attempted_at: Some(now),
                feed_errors: cycle.failures,
                last_error: Some(error),
                triggered_orders: Vec::new(),
                ..(*previous).clone()
            });
            self.snapshot.send_replace(Arc::clone(&failed));
            return failed;
        }

        let gas_cost_usd = self.gas_cost_usd(&cycle.snapshot);
        let params = DetectionParams {
            gas_cost_usd,
            ..self.settings.detection.clone()
        };

        // Both consumers see the same quotes.
        let opportunities = detect_opportunities(&cycle.snapshot, &tokens, &params, now, None);
        let triggered = self.orders.evaluate(&cycle.snapshot);

        let published = Arc::new(ScanSnapshot {
            version: previous.version + 1,
            scanned_at: Some(now),
            attempted_at: Some(now),
            opportunities: Arc::new(opportunities),
            quotes: Arc::new(cycle.snapshot),
            feed_errors: cycle.failures,
            last_error: None,
            triggered_orders: triggered.iter().map(|t| t.order_id().to_string()).collect(),
        });
        self.snapshot.send_replace(Arc::clone(&published));

        let mids = published.quotes.mid_prices();
        self.tokens.apply_prices(mids.iter().map(|(address, price)| (address, *price)));

        if self.settings.auto_execute_orders {
            for order in triggered {
                let order_id = order.order_id().to_string();
                if let Err(err) = self.dispatcher.dispatch(ExecutionTarget::Order(order)) {
                    warn!(order_id = %order_id, error = %err, "Triggered order not dispatched");
                }
            }
        }

        metrics::inc_scans();
        metrics::set_opportunities_current(published.opportunities.len());
        info!(
            opportunities = published.opportunities.len(),
            triggered = published.triggered_orders.len(),
            quotes = published.quotes.len(),
            dropped_exchanges = published.feed_errors.len(),
            gas_usd = %gas_cost_usd.round_dp(4),
            "Scan pass complete"
        );

        published
    }

    fn gas_cost_usd(&self, quotes: &QuoteSnapshot) -> Decimal {
        let native_usd = self
            .tokens
            .by_symbol("WETH")
            .and_then(|weth| quotes.mid_prices().get(&weth.address).copied())
            .unwrap_or(self.settings.native_usd_fallback);
        self.settings.gas.cost_usd(native_usd)
    }
}
