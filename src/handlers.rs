// src/handlers.rs - HTTP adapter over PortfolioService
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

use crate::{
    config::AppConfig,
    models::*,
    monitoring::{performance_middleware, MetricsSummary, RequestMonitor},
    remote::RemoteFetchError,
    service::PortfolioService,
};

pub struct AppState {
    pub service: PortfolioService,
    pub monitor: RequestMonitor,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(service: PortfolioService, config: AppConfig) -> Self {
        let monitor = RequestMonitor::new(std::time::Duration::from_millis(
            config.server.slow_request_ms,
        ));
        Self {
            service,
            monitor,
            config,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/portfolio/:quarter", get(get_portfolio_by_quarter))
        .route("/quarters/summary", get(get_quarters_summary))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/status", get(cache_status))
        .route("/connection", get(connection_status))
        .route("/connection/test", post(connection_test))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            performance_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    if state.config.server.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app.with_state(state)
}

/// Constituents of one quarter, heaviest first
pub async fn get_portfolio_by_quarter(
    Path(quarter): Path<String>,
    Query(query): Query<OwnerQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<PortfolioConstituent>> {
    if let Err(e) = ValidationRules::validate_quarter(&quarter) {
        return Err(ApiError::Validation(e).into());
    }

    debug!("Portfolio request: {} (owner: {:?})", quarter, query.owner());

    state
        .service
        .get_portfolio_by_quarter(&quarter, query.owner())
        .await
        .map(Json)
        .map_err(map_remote_error)
}

/// Per-quarter stock count, average return and total weight
pub async fn get_quarters_summary(
    Query(query): Query<OwnerQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<QuarterSummary>> {
    state
        .service
        .get_quarters_summary(query.owner())
        .await
        .map(Json)
        .map_err(map_remote_error)
}

pub async fn clear_cache(
    Query(query): Query<ClearCacheQuery>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    let pattern = query.pattern.as_deref().filter(|p| !p.is_empty());
    state.service.clear_cache(pattern);
    StatusCode::NO_CONTENT
}

pub async fn cache_status(State(state): State<Arc<AppState>>) -> Json<CacheStatusReport> {
    Json(state.service.cache_status())
}

pub async fn connection_status(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    Json(state.service.get_connection_status())
}

pub async fn connection_test(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    Json(state.service.force_connection_test().await)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        backend: state.service.backend().to_string(),
        cached_entries: state.service.cached_entries(),
        uptime_seconds: state.monitor.uptime().as_secs_f64(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSummary> {
    Json(state.monitor.summary())
}

pub fn map_remote_error(e: RemoteFetchError) -> (StatusCode, Json<ErrorResponse>) {
    error!("Remote fetch error: {}", e);
    ApiError::Remote(e).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::UNMATCHED_ENDPOINT;
    use crate::remote::{RemoteQuery, RemoteSource, Row};
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use futures::{future::BoxFuture, FutureExt};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    struct StaticSource {
        fail: AtomicBool,
    }

    impl RemoteSource for StaticSource {
        fn select<'a>(
            &'a self,
            query: &'a RemoteQuery,
        ) -> BoxFuture<'a, Result<Vec<Row>, RemoteFetchError>> {
            async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(RemoteFetchError::Status {
                        status: 503,
                        message: "unavailable".to_string(),
                    });
                }
                let row = json!({
                    "id": 1,
                    "user_id": null,
                    "quarter": "2024Q1",
                    "stock_name": "Apple",
                    "stock_code": "AAPL",
                    "logo_url": "https://logo.example/aapl.png",
                    "weight": 0.6,
                    "returns": 8.0,
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-01T00:00:00Z"
                });
                let rows = match (query.table.as_str(), row) {
                    ("portfolios", Value::Object(map)) => vec![map],
                    _ => Vec::new(),
                };
                Ok(rows)
            }
            .boxed()
        }

        fn backend(&self) -> &'static str {
            "static"
        }
    }

    fn state(fail: bool) -> Arc<AppState> {
        let config = AppConfig::development();
        let service = PortfolioService::new(
            Arc::new(StaticSource {
                fail: AtomicBool::new(fail),
            }),
            config.cache.freshness_window(),
        );
        Arc::new(AppState::new(service, config))
    }

    fn app(fail: bool) -> Router {
        router(state(fail))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_portfolio_endpoint() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/portfolio/2024Q1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["stock_code"], "AAPL");
    }

    #[tokio::test]
    async fn test_summary_endpoint() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/quarters/summary?userId=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["quarter"], "2024Q1");
        assert_eq!(body[0]["total_stocks"], 1);
    }

    #[tokio::test]
    async fn test_remote_failure_is_bad_gateway() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .uri("/portfolio/2024Q1?userId=u-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_invalid_quarter_rejected() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/portfolio/Q1%3Bdrop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clear_cache_and_connection() {
        let app = app(false);

        let response = app.clone().oneshot(get_request("/portfolio/2024Q1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_request("/cache/status")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total_entries"], 1);
        assert_eq!(body["entries"][0]["key"], "portfolio_2024Q1_public");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cache/clear?pattern=2024Q1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(get_request("/cache/status")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total_entries"], 0);
        assert_eq!(body["entries"], json!([]));

        let response = app.oneshot(get_request("/connection")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body, json!({"isConnected": true, "retryCount": 0}));
    }

    #[tokio::test]
    async fn test_unmatched_paths_share_one_metrics_entry() {
        let state = state(false);
        let app = router(state.clone());

        for i in 0..50 {
            let uri = format!("/junk/{}", i);
            let response = app.clone().oneshot(get_request(&uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let summary = state.monitor.summary();
        assert_eq!(summary.endpoints.len(), 1);
        assert_eq!(summary.endpoints[UNMATCHED_ENDPOINT].request_count, 50);
        assert_eq!(summary.failed_requests, 50);
    }

    #[tokio::test]
    async fn test_metrics_keyed_by_route_template() {
        let state = state(false);
        let app = router(state.clone());

        for quarter in ["2024Q1", "2024Q2", "2024Q3"] {
            let uri = format!("/portfolio/{}", quarter);
            app.clone().oneshot(get_request(&uri)).await.unwrap();
        }

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["endpoints"]["/portfolio/:quarter"]["request_count"], 3);
        assert!(body["endpoints"].get("/portfolio/2024Q1").is_none());
    }
}
