//! HTTP API route definitions.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    cancel_order, executions, execute_opportunity, get_order, health, list_orders, metrics,
    opportunities, ready, request_scan, status, submit_order, tokens, AppState,
};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        // Engine
        .route("/api/v1/status", get(status))
        .route("/api/v1/scan", post(request_scan))
        .route("/api/v1/tokens", get(tokens))
        .route("/api/v1/opportunities", get(opportunities))
        .route("/api/v1/opportunities/:id/execute", post(execute_opportunity))
        .route("/api/v1/executions", get(executions))
        // Orders
        .route("/api/v1/orders", get(list_orders).post(submit_order))
        .route("/api/v1/orders/:id", get(get_order).delete(cancel_order))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::execution::SimulatedExecutor;
    use crate::feed::{ExchangeFeed, MockExchangeFeed};
    use crate::service::ArbService;
    use crate::token::BASE_TOKENS;

    fn state() -> AppState {
        let weth = BASE_TOKENS[0].address.clone();
        let feeds: Vec<Arc<dyn ExchangeFeed>> = vec![
            Arc::new(MockExchangeFeed::new("uniswap-v3").with_quote(weth.clone(), dec!(2455.00), dec!(2456.78))),
            Arc::new(MockExchangeFeed::new("aerodrome").with_quote(weth, dec!(2478.92), dec!(2480.50))),
        ];
        let service = ArbService::new(Config::default(), feeds, Arc::new(SimulatedExecutor::new()));
        AppState::new(Arc::new(service))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = send(create_router(state()), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ready_reflects_first_scan() {
        let state = state();

        let (status, _) = send(create_router(state.clone()), get_req("/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.service.scan_now().await;
        let (status, body) = send(create_router(state), get_req("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scan_version"], 1);
    }

    #[tokio::test]
    async fn opportunities_are_listed_and_executable() {
        let state = state();
        state.service.scan_now().await;

        let (status, body) =
            send(create_router(state.clone()), get_req("/api/v1/opportunities?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["opportunities"][0]["buy_exchange"], "uniswap-v3");
        assert_eq!(body["opportunities"][0]["confidence"], "medium");

        let (status, body) = send(
            create_router(state.clone()),
            json_req("POST", "/api/v1/opportunities/weth:uniswap-v3:aerodrome/execute", Value::Null),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = send(
            create_router(state),
            json_req("POST", "/api/v1/opportunities/nope/execute", Value::Null),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn order_lifecycle_over_http() {
        let state = state();

        let (status, order) = send(
            create_router(state.clone()),
            json_req(
                "POST",
                "/api/v1/orders",
                serde_json::json!({
                    "from_token": "DAI",
                    "to_token": "WETH",
                    "amount": "1000",
                    "order_type": "stop-loss",
                    "trigger_price": "0.0004"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "active");
        let id = order["order_id"].as_str().unwrap().to_string();

        let (status, body) =
            send(create_router(state.clone()), get_req("/api/v1/orders?status=active")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let uri = format!("/api/v1/orders/{}", id);
        let (status, body) = send(create_router(state.clone()), json_req("DELETE", &uri, Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");

        let (status, body) = send(create_router(state.clone()), json_req("DELETE", &uri, Value::Null)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already cancelled"));

        let (status, _) = send(
            create_router(state),
            json_req("DELETE", "/api/v1/orders/ord-missing", Value::Null),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_order_and_query_are_rejected() {
        let state = state();

        let (status, _) = send(
            create_router(state.clone()),
            json_req(
                "POST",
                "/api/v1/orders",
                serde_json::json!({
                    "from_token": "DAI",
                    "to_token": "PEPE",
                    "amount": "1",
                    "order_type": "limit",
                    "trigger_price": "1"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(create_router(state), get_req("/api/v1/orders?sort=bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scan_request_is_accepted() {
        let (status, body) =
            send(create_router(state()), json_req("POST", "/api/v1/scan", Value::Null)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "triggered");
    }

    #[tokio::test]
    async fn tokens_and_status() {
        let state = state();
        let (status, body) = send(create_router(state.clone()), get_req("/api/v1/tokens")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 4);

        let (status, body) = send(create_router(state), get_req("/api/v1/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["executor"], "simulated");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let response = create_router(state())
            .oneshot(get_req("/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
