//! Engine facade consumed by the HTTP API and the CLI.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{info, instrument};
use url::Url;

use crate::arbitrage::ArbitrageOpportunity;
use crate::config::Config;
use crate::error::{AppError, ExecutionError, OrderError, Result};
use crate::execution::{
    ExecutionDispatcher, ExecutionResult, ExecutionTarget, Executor, ExecutorStats, HttpExecutor,
    SimulatedExecutor,
};
use crate::feed::{simulated_feeds, ExchangeFeed, HttpQuoteFeed, PriceFeedAdapter};
use crate::orders::{NewOrder, OrderBook, OrderFilter, OrderSort, SlippagePolicy, TradeOrder};
use crate::scanner::{ScanRequest, ScanScheduler, ScanSettings, ScanSnapshot, ScanState};
use crate::token::{Token, TokenRegistry};

/// Engine status for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Scheduler state.
    pub state: ScanState,
    /// Passes completed.
    pub scan_version: u64,
    /// Last successful scan.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_scan_at: Option<OffsetDateTime>,
    /// Last attempted scan.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<OffsetDateTime>,
    /// Error of the last pass, if it failed.
    pub last_error: Option<String>,
    /// Exchanges dropped during the last pass.
    pub feed_errors: Vec<String>,
    /// Exchanges queried.
    pub exchanges: Vec<String>,
    /// Opportunities in the current snapshot.
    pub opportunities: usize,
    /// Active orders.
    pub active_orders: usize,
    /// All orders.
    pub total_orders: usize,
    /// Outstanding executions.
    pub executions_in_flight: usize,
    /// Executor in use.
    pub executor: &'static str,
    /// Simulation mode.
    pub dry_run: bool,
    /// Execution totals.
    pub stats: ExecutorStats,
    /// Percentage of finished executions that succeeded.
    pub success_rate: Decimal,
    /// Seconds since start.
    pub uptime_secs: i64,
}

/// Arbitrage scanner and conditional order engine.
#[derive(Debug)]
pub struct ArbService {
    config: Config,
    tokens: Arc<TokenRegistry>,
    orders: Arc<OrderBook>,
    dispatcher: ExecutionDispatcher,
    scheduler: Arc<ScanScheduler>,
    exchanges: Vec<String>,
    started_at: OffsetDateTime,
}

impl ArbService {
    /// Assemble the engine from explicit feeds and executor.
    pub fn new(config: Config, feeds: Vec<Arc<dyn ExchangeFeed>>, executor: Arc<dyn Executor>) -> Self {
        let tokens = Arc::new(TokenRegistry::with_defaults());
        let orders = Arc::new(OrderBook::new(
            Arc::clone(&tokens),
            SlippagePolicy::from_config(&config),
        ));
        let dispatcher = ExecutionDispatcher::new(executor, config.execution_timeout());
        let adapter = PriceFeedAdapter::new(feeds, config.fetch_timeout());
        let exchanges = adapter.exchanges().iter().map(|e| e.to_string()).collect();
        let scheduler = Arc::new(ScanScheduler::new(
            adapter,
            Arc::clone(&tokens),
            Arc::clone(&orders),
            dispatcher.clone(),
            ScanSettings::from_config(&config),
        ));

        Self {
            config,
            tokens,
            orders,
            dispatcher,
            scheduler,
            exchanges,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Assemble the engine with feeds and executor chosen by config.
    ///
    /// No `FEED_ENDPOINTS` means simulated feeds; dry run or no
    /// `EXECUTION_URL` means the simulated executor.
    pub fn from_config(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout().max(config.execution_timeout()))
            .build()?;

        let feeds = build_feeds(&config, &http)?;
        let executor = build_executor(&config, &http)?;
        info!(
            feeds = feeds.len(),
            executor = executor.name(),
            dry_run = config.dry_run,
            "Engine assembled"
        );
        Ok(Self::new(config, feeds, executor))
    }

    /// Submit a limit or stop-loss order.
    pub fn submit_order(&self, order: NewOrder) -> std::result::Result<TradeOrder, OrderError> {
        self.orders.submit(order)
    }

    /// Cancel an active order.
    pub fn cancel_order(&self, order_id: &str) -> std::result::Result<TradeOrder, OrderError> {
        self.orders.cancel(order_id)
    }

    /// Look up one order.
    pub fn order(&self, order_id: &str) -> Option<TradeOrder> {
        self.orders.get(order_id)
    }

    /// Orders matching a filter, in the requested order.
    pub fn orders(&self, filter: OrderFilter, sort: OrderSort) -> Vec<TradeOrder> {
        self.orders.list(filter, sort)
    }

    /// Request a scan without waiting for it.
    pub fn request_scan(&self) -> ScanRequest {
        self.scheduler.request_scan()
    }

    /// Run a scan (or join the running one) and return its snapshot.
    pub async fn scan_now(&self) -> Arc<ScanSnapshot> {
        self.scheduler.scan_now().await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ScanSnapshot> {
        self.scheduler.latest()
    }

    /// Current opportunities, best first.
    pub fn opportunities(&self, limit: Option<usize>) -> Vec<ArbitrageOpportunity> {
        self.scheduler.latest().top(limit)
    }

    /// Execute an opportunity from the current snapshot.
    #[instrument(skip(self))]
    pub async fn execute_opportunity(
        &self,
        id: &str,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        let snapshot = self.scheduler.latest();
        let opportunity = snapshot
            .opportunity(id)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownTarget(id.to_string()))?;
        self.dispatcher
            .execute(ExecutionTarget::Opportunity(opportunity))
            .await
    }

    /// Known tokens with their last-known prices.
    pub fn tokens(&self) -> Vec<Token> {
        self.tokens.all()
    }

    /// Subscribe to execution outcomes.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ExecutionResult> {
        self.dispatcher.subscribe()
    }

    /// Most recent execution outcomes, newest first.
    pub fn recent_executions(&self, limit: usize) -> Vec<ExecutionResult> {
        self.dispatcher.recent_results(limit)
    }

    /// Whether at least one scan has succeeded.
    pub fn is_ready(&self) -> bool {
        self.scheduler.latest().scanned_at.is_some()
    }

    /// Engine status.
    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.scheduler.latest();
        let stats = self.dispatcher.stats();
        ServiceStatus {
            state: self.scheduler.state(),
            scan_version: snapshot.version,
            last_scan_at: snapshot.scanned_at,
            last_attempt_at: snapshot.attempted_at,
            last_error: snapshot.last_error.clone(),
            feed_errors: snapshot.feed_errors.iter().map(ToString::to_string).collect(),
            exchanges: self.exchanges.clone(),
            opportunities: snapshot.opportunities.len(),
            active_orders: self.orders.active_count(),
            total_orders: self.orders.len(),
            executions_in_flight: self.dispatcher.in_flight_count(),
            executor: self.dispatcher.executor_name(),
            dry_run: self.config.dry_run,
            success_rate: stats.success_rate(),
            stats,
            uptime_secs: (OffsetDateTime::now_utc() - self.started_at).whole_seconds(),
        }
    }

    /// Wait until no accepted execution is outstanding.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await
    }

    /// Run the scheduler until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.scheduler.run(shutdown).await
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Build exchange feeds from `FEED_ENDPOINTS`, or simulated ones.
pub fn build_feeds(config: &Config, http: &reqwest::Client) -> Result<Vec<Arc<dyn ExchangeFeed>>> {
    let endpoints = config.feed_endpoints().map_err(AppError::InvalidConfig)?;

    if endpoints.is_empty() {
        info!("No FEED_ENDPOINTS configured, using simulated feeds");
        return Ok(simulated_feeds()
            .into_iter()
            .map(|feed| Arc::new(feed) as Arc<dyn ExchangeFeed>)
            .collect());
    }

    Ok(endpoints
        .into_iter()
        .map(|(id, url)| Arc::new(HttpQuoteFeed::new(id, url, http.clone())) as Arc<dyn ExchangeFeed>)
        .collect())
}

/// Build the executor: HTTP when live, simulated otherwise.
pub fn build_executor(config: &Config, http: &reqwest::Client) -> Result<Arc<dyn Executor>> {
    match (&config.execution_url, config.dry_run) {
        (Some(raw), false) => {
            let url = Url::parse(raw)
                .map_err(|e| AppError::InvalidConfig(format!("EXECUTION_URL: {}", e)))?;
            Ok(Arc::new(HttpExecutor::new(url, http.clone())))
        }
        _ => Ok(Arc::new(SimulatedExecutor::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MockExchangeFeed;
    use rust_decimal_macros::dec;

    fn service() -> ArbService {
        let weth = crate::token::BASE_TOKENS[0].address.clone();
        let feeds: Vec<Arc<dyn ExchangeFeed>> = vec![
            Arc::new(MockExchangeFeed::new("uniswap-v3").with_quote(weth.clone(), dec!(2455.00), dec!(2456.78))),
            Arc::new(MockExchangeFeed::new("aerodrome").with_quote(weth, dec!(2478.92), dec!(2480.50))),
        ];
        ArbService::new(Config::default(), feeds, Arc::new(SimulatedExecutor::new()))
    }

    #[tokio::test]
    async fn execute_known_and_unknown_opportunities() {
        let service = service();
        assert!(!service.is_ready());
        service.scan_now().await;
        assert!(service.is_ready());

        let result = service
            .execute_opportunity("weth:uniswap-v3:aerodrome")
            .await
            .unwrap();
        assert!(result.success);

        let err = service.execute_opportunity("dai:a:b").await.unwrap_err();
        assert_eq!(err, ExecutionError::UnknownTarget("dai:a:b".to_string()));

        let status = service.status();
        assert_eq!(status.stats.successes, 1);
        assert_eq!(status.success_rate, dec!(100));
        assert_eq!(status.exchanges, vec!["uniswap-v3", "aerodrome"]);
    }

    #[tokio::test]
    async fn abandoned_execution_is_awaited_on_idle() {
        let weth = crate::token::BASE_TOKENS[0].address.clone();
        let feeds: Vec<Arc<dyn ExchangeFeed>> = vec![
            Arc::new(MockExchangeFeed::new("uniswap-v3").with_quote(weth.clone(), dec!(2455.00), dec!(2456.78))),
            Arc::new(MockExchangeFeed::new("aerodrome").with_quote(weth, dec!(2478.92), dec!(2480.50))),
        ];
        let executor = SimulatedExecutor::new().with_latency(std::time::Duration::from_millis(100));
        let service = Arc::new(ArbService::new(Config::default(), feeds, Arc::new(executor)));
        service.scan_now().await;

        // A caller that goes away after the execution was accepted.
        let caller = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.execute_opportunity("weth:uniswap-v3:aerodrome").await })
        };
        while service.status().executions_in_flight == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();

        service.wait_idle().await;
        assert_eq!(service.status().executions_in_flight, 0);
        let recent = service.recent_executions(10);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].success);
    }

    #[test]
    fn default_config_uses_simulated_components() {
        let http = reqwest::Client::new();
        let config = Config::default();

        let feeds = build_feeds(&config, &http).unwrap();
        assert_eq!(feeds.len(), 4);
        assert_eq!(build_executor(&config, &http).unwrap().name(), "simulated");

        let live = Config {
            dry_run: false,
            execution_url: Some("https://exec.example/run".to_string()),
            ..Config::default()
        };
        assert_eq!(build_executor(&live, &http).unwrap().name(), "http");
    }

    #[test]
    fn feed_endpoints_build_http_feeds() {
        let http = reqwest::Client::new();
        let config = Config {
            feed_endpoints: "uniswap-v3=https://quotes.example/uni,aerodrome=https://quotes.example/aero"
                .to_string(),
            ..Config::default()
        };

        let feeds = build_feeds(&config, &http).unwrap();
        let ids: Vec<&str> = feeds.iter().map(|f| f.id().as_str()).collect();
        assert_eq!(ids, vec!["uniswap-v3", "aerodrome"]);
    }
}
