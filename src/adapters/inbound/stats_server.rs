//! Operational Stats Server
//!
//! HTTP API exposing cache, pool and load balancer statistics, plus cache
//! invalidation for operators.

use crate::application::{CacheManager, LoadBalancer};
use crate::infrastructure::connection_pool::{PoolStats, PoolStatsSource};
use crate::infrastructure::shutdown::ShutdownController;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub healthy_servers: usize,
}

/// Cache invalidation request.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

/// Stats server state.
#[derive(Clone)]
pub struct StatsState {
    pub cache: Arc<CacheManager>,
    pub load_balancer: Arc<LoadBalancer>,
    pub pools: Vec<Arc<dyn PoolStatsSource>>,
}

impl StatsState {
    pub fn new(cache: Arc<CacheManager>, load_balancer: Arc<LoadBalancer>) -> Self {
        Self {
            cache,
            load_balancer,
            pools: Vec::new(),
        }
    }

    /// Report stats for another pool.
    pub fn with_pool(mut self, pool: Arc<dyn PoolStatsSource>) -> Self {
        self.pools.push(pool);
        self
    }
}

/// Build the stats router.
pub fn router(state: StatsState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/stats/cache/invalidate", post(invalidate_handler))
        .route("/stats/pools", get(pool_stats_handler))
        .route("/stats/load-balancer", get(lb_stats_handler))
        .route("/stats/reset", post(reset_handler))
        .with_state(state)
}

/// Stats HTTP server.
pub struct StatsServer {
    listen_addr: String,
    state: StatsState,
}

impl StatsServer {
    pub fn new(listen_addr: String, state: StatsState) -> Self {
        Self { listen_addr, state }
    }

    /// Serve until shutdown is signalled.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self, shutdown: ShutdownController) -> anyhow::Result<()> {
        let app = router(self.state.clone()).layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("stats server listening on {}", self.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;
        tracing::info!("stats server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<StatsState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        healthy_servers: state.load_balancer.get_stats().healthy_servers,
    })
}

async fn cache_stats_handler(State(state): State<StatsState>) -> impl IntoResponse {
    Json(state.cache.get_stats().await)
}

async fn pool_stats_handler(State(state): State<StatsState>) -> impl IntoResponse {
    let pools: Vec<PoolStats> = state.pools.iter().map(|p| p.pool_stats()).collect();
    Json(pools)
}

async fn lb_stats_handler(State(state): State<StatsState>) -> impl IntoResponse {
    Json(state.load_balancer.get_stats())
}

async fn invalidate_handler(
    State(state): State<StatsState>,
    Json(req): Json<InvalidateRequest>,
) -> impl IntoResponse {
    let pattern = req.pattern.trim().to_string();
    if pattern.is_empty() || pattern == "*" {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "pattern must name a key prefix"
            })),
        );
    }

    let removed = state.cache.invalidate_pattern(&pattern).await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "pattern": pattern,
            "removed": removed
        })),
    )
}

async fn reset_handler(State(state): State<StatsState>) -> impl IntoResponse {
    state.cache.reset_metrics();
    state.load_balancer.reset_stats();
    Json(serde_json::json!({ "reset": true }))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::application::{CacheConfig, LoadBalancerConfig};
    use crate::domain::entities::Server;
    use axum::{
        body::Body,
        http::{Request, StatusCode as HttpStatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn create_test_state() -> StatsState {
        let cache = Arc::new(CacheManager::new(CacheConfig::default(), None));
        let lb = Arc::new(LoadBalancer::new(LoadBalancerConfig::default()).unwrap());
        lb.add_server(Server::new("a:1"));
        lb.add_server(Server::new("b:1")).mark_unhealthy();
        StatsState::new(cache, lb)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_handler() {
        let app = router(create_test_state());

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), HttpStatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["healthy_servers"], 1);
    }

    #[tokio::test]
    async fn test_lb_stats_handler() {
        let app = router(create_test_state());

        let request = Request::builder()
            .uri("/stats/load-balancer")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), HttpStatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["strategy"], "round_robin");
        assert_eq!(body["total_servers"], 2);
        assert_eq!(body["servers"][1]["healthy"], false);
    }

    #[tokio::test]
    async fn test_cache_stats_handler() {
        let state = create_test_state();
        state.cache.set("k", &1, None).await;
        let app = router(state);

        let request = Request::builder()
            .uri("/stats/cache")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["remote_configured"], false);
        assert_eq!(body["local_entries"], 1);
        assert_eq!(body["metrics"]["sets"], 1);
    }

    #[tokio::test]
    async fn test_pool_stats_handler_empty() {
        let app = router(create_test_state());

        let request = Request::builder()
            .uri("/stats/pools")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), HttpStatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_invalidate_handler() {
        let state = create_test_state();
        state.cache.set("user:1:a", &1, None).await;
        state.cache.set("user:1:b", &2, None).await;
        state.cache.set("user:2:a", &3, None).await;
        let app = router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/stats/cache/invalidate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"pattern":"user:1:*"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), HttpStatusCode::OK);
        assert_eq!(body_json(response).await["removed"], 2);
        assert_eq!(state.cache.local().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_rejects_wildcard_only() {
        let app = router(create_test_state());

        let request = Request::builder()
            .method("POST")
            .uri("/stats/cache/invalidate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"pattern":"*"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), HttpStatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset_handler() {
        let state = create_test_state();
        state.cache.get::<i32>("missing").await;
        let app = router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/stats/reset")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), HttpStatusCode::OK);
        assert_eq!(state.cache.metrics().misses, 0);
    }
}
