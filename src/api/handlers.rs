//! HTTP API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::arbitrage::ArbitrageOpportunity;
use crate::error::{ExecutionError, OrderError};
use crate::execution::ExecutionResult;
use crate::orders::{NewOrder, OrderFilter, OrderSort, TradeOrder};
use crate::scanner::ScanRequest;
use crate::service::{ArbService, ServiceStatus};
use crate::token::Token;

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The engine.
    pub service: Arc<ArbService>,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state around a service.
    pub fn new(service: Arc<ArbService>) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

// ===== Errors =====

/// Error surfaced to API callers.
#[derive(Debug)]
pub enum ApiError {
    /// Order operation failed.
    Order(OrderError),
    /// Execution failed or was rejected.
    Execution(ExecutionError),
    /// Request could not be understood.
    BadRequest(String),
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        ApiError::Execution(err)
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Order(OrderError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Order(OrderError::AlreadyTerminal { .. } | OrderError::Conflict { .. }) => {
                StatusCode::CONFLICT
            }
            ApiError::Order(OrderError::InvalidParams(_) | OrderError::UnknownToken(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Execution(ExecutionError::UnknownTarget(_)) => StatusCode::NOT_FOUND,
            ApiError::Execution(ExecutionError::AlreadyInFlight { .. }) => StatusCode::CONFLICT,
            ApiError::Execution(ExecutionError::Failed { .. } | ExecutionError::Timeout { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Order(err) => err.to_string(),
            ApiError::Execution(err) => err.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
        };
        if status.is_server_error() {
            warn!(status = %status, error = %message, "API request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ===== Request/Response Types =====

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether a scan has succeeded.
    pub ready: bool,
    /// Scan passes completed.
    pub scan_version: u64,
}

/// `?limit=` query.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    /// Maximum number of results.
    pub limit: Option<usize>,
}

/// `?status=&sort=` query.
#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    /// Status filter.
    #[serde(default)]
    pub status: Option<String>,
    /// Sort key.
    #[serde(default)]
    pub sort: Option<String>,
}

/// Opportunity listing.
#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    /// Number returned.
    pub count: usize,
    /// Scan pass they come from.
    pub scan_version: u64,
    /// Opportunities, best first.
    pub opportunities: Vec<ArbitrageOpportunity>,
}

/// Order listing.
#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    /// Number returned.
    pub count: usize,
    /// Orders.
    pub orders: Vec<TradeOrder>,
}

/// Scan request response.
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    /// What happened to the request.
    pub outcome: ScanRequest,
}

// ===== Handlers =====

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check handler - returns 200 once a scan has succeeded, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.service.is_ready(),
        scan_version: state.service.snapshot().version,
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Engine status and execution statistics.
pub async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

/// Current opportunities.
pub async fn opportunities(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<OpportunitiesResponse> {
    let snapshot = state.service.snapshot();
    let opportunities = snapshot.top(query.limit);
    Json(OpportunitiesResponse {
        count: opportunities.len(),
        scan_version: snapshot.version,
        opportunities,
    })
}

/// Execute an opportunity by id.
pub async fn execute_opportunity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let result = state.service.execute_opportunity(&id).await?;
    Ok(Json(result))
}

/// List orders.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<OrdersResponse>, ApiError> {
    let filter = match query.status.as_deref() {
        Some(raw) => raw
            .parse::<OrderFilter>()
            .map_err(|_| ApiError::BadRequest(format!("unknown status filter '{}'", raw)))?,
        None => OrderFilter::default(),
    };
    let sort = match query.sort.as_deref() {
        Some(raw) => raw
            .parse::<OrderSort>()
            .map_err(|_| ApiError::BadRequest(format!("unknown sort '{}'", raw)))?,
        None => OrderSort::default(),
    };

    let orders = state.service.orders(filter, sort);
    Ok(Json(OrdersResponse {
        count: orders.len(),
        orders,
    }))
}

/// Submit an order.
pub async fn submit_order(
    State(state): State<AppState>,
    Json(order): Json<NewOrder>,
) -> Result<(StatusCode, Json<TradeOrder>), ApiError> {
    let order = state.service.submit_order(order)?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Fetch one order.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TradeOrder>, ApiError> {
    state
        .service
        .order(&id)
        .map(Json)
        .ok_or_else(|| ApiError::Order(OrderError::NotFound { order_id: id }))
}

/// Cancel an order.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TradeOrder>, ApiError> {
    Ok(Json(state.service.cancel_order(&id)?))
}

/// Request a scan.
pub async fn request_scan(State(state): State<AppState>) -> (StatusCode, Json<ScanResponse>) {
    let outcome = state.service.request_scan();
    let status = match outcome {
        ScanRequest::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::ACCEPTED,
    };
    (status, Json(ScanResponse { outcome }))
}

/// Known tokens.
pub async fn tokens(State(state): State<AppState>) -> Json<Vec<Token>> {
    Json(state.service.tokens())
}

/// Recent execution outcomes.
pub async fn executions(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<ExecutionResult>> {
    Json(state.service.recent_executions(query.limit.unwrap_or(50)))
}

/// Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
