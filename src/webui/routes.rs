//! Admin API routes and handlers.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        MatchedPath, Path, Query, Request, State,
    },
    http::header,
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::error::WebUiError;
use crate::metrics::{metrics_handler, MetricsCollector};
use crate::work::{
    Client, DeadJob, JobPage, Queue, RetryJob, ScheduledJob, WorkerObservation,
    WorkerPoolHeartbeat,
};

const INDEX_HTML: &str = include_str!("assets/index.html");

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

type ApiResult<T> = Result<Json<T>, WebUiError>;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Client,
    metrics: MetricsCollector,
}

impl AppState {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            metrics: MetricsCollector::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    page: Option<u32>,
}

impl PageParams {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }
}

/// Builds the admin API router over `client`.
pub fn router(client: Client) -> Router {
    let state = AppState::new(client);

    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/queues", get(queues))
        .route("/worker_pools", get(worker_pools))
        .route("/busy_workers", get(busy_workers))
        .route("/retry_jobs", get(retry_jobs))
        .route("/scheduled_jobs", get(scheduled_jobs))
        .route("/dead_jobs", get(dead_jobs))
        .route("/delete_dead_job/:died_at/:job_id", post(delete_dead_job))
        .route("/retry_dead_job/:died_at/:job_id", post(retry_dead_job))
        .route("/delete_all_dead_jobs", post(delete_all_dead_jobs))
        .route("/retry_all_dead_jobs", post(retry_all_dead_jobs))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Counts each request against the route template it matched.
async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(req).await;
    state
        .metrics
        .record_request(&route, response.status().as_u16());
    response
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn ping() -> Json<Value> {
    Json(json!({
        "ping": "pong",
        "current_time": chrono::Utc::now().to_rfc3339()
    }))
}

async fn queues(State(state): State<AppState>) -> ApiResult<Vec<Queue>> {
    Ok(Json(state.client.queues().await?))
}

async fn worker_pools(State(state): State<AppState>) -> ApiResult<Vec<WorkerPoolHeartbeat>> {
    Ok(Json(state.client.worker_pool_heartbeats().await?))
}

async fn busy_workers(State(state): State<AppState>) -> ApiResult<Vec<WorkerObservation>> {
    Ok(Json(state.client.busy_workers().await?))
}

async fn retry_jobs(
    State(state): State<AppState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<JobPage<RetryJob>> {
    let Query(params) = params?;
    Ok(Json(state.client.retry_jobs(params.page()).await?))
}

async fn scheduled_jobs(
    State(state): State<AppState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<JobPage<ScheduledJob>> {
    let Query(params) = params?;
    Ok(Json(state.client.scheduled_jobs(params.page()).await?))
}

async fn dead_jobs(
    State(state): State<AppState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<JobPage<DeadJob>> {
    let Query(params) = params?;
    Ok(Json(state.client.dead_jobs(params.page()).await?))
}

async fn delete_dead_job(
    State(state): State<AppState>,
    path: Result<Path<(i64, String)>, PathRejection>,
) -> ApiResult<Value> {
    let Path((died_at, job_id)) = path?;
    state.client.delete_dead_job(died_at, &job_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn retry_dead_job(
    State(state): State<AppState>,
    path: Result<Path<(i64, String)>, PathRejection>,
) -> ApiResult<Value> {
    let Path((died_at, job_id)) = path?;
    state.client.retry_dead_job(died_at, &job_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn delete_all_dead_jobs(State(state): State<AppState>) -> ApiResult<Value> {
    state.client.delete_all_dead_jobs().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn retry_all_dead_jobs(State(state): State<AppState>) -> ApiResult<Value> {
    let requeued = state.client.retry_all_dead_jobs().await?;
    Ok(Json(json!({ "status": "ok", "requeued": requeued })))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.observe_pool(&state.client.pool().stats());
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics_handler().await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    use crate::metrics::init_metrics;
    use crate::pool::{PoolConfig, RedisConnector, RedisPool};
    use crate::sentinel::StaticResolver;
    use crate::work::testing::{dead_job_json, FakeRedis};

    /// A router whose pool points at a port nothing listens on.
    fn unreachable_router() -> Router {
        let connector = RedisConnector::new(Arc::new(StaticResolver::new("127.0.0.1:1")), 0);
        let pool = RedisPool::new(connector, PoolConfig::default());
        router(Client::new("work", pool))
    }

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_ping_never_touches_redis() {
        let (status, body) = send(unreachable_router(), Method::GET, "/ping").await;
        assert_eq!(status, StatusCode::OK);

        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["ping"], "pong");
        assert!(value["current_time"].is_string());
    }

    #[tokio::test]
    async fn test_index_serves_dashboard() {
        let (status, body) = send(unreachable_router(), Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("<html"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_service_unavailable() {
        let (status, body) = send(unreachable_router(), Method::GET, "/queues").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["error"]["code"], "BACKEND_UNAVAILABLE");
        assert_eq!(value["error"]["status"], 503);
    }

    #[tokio::test]
    async fn test_bad_died_at_is_bad_request() {
        let (status, body) = send(
            unreachable_router(),
            Method::POST,
            "/retry_dead_job/yesterday/abc",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_dead_job_actions_over_http() {
        let redis = FakeRedis::start().await;
        let client = redis.client("work");
        let dead = client.keys().dead();
        redis.zadd(&dead, &dead_job_json("send_email", "job-1", 1_700_000_000), 1_700_000_000);
        let app = router(client);

        let (status, body) = send(app.clone(), Method::GET, "/dead_jobs?page=1").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["count"], 1);
        assert_eq!(value["jobs"][0]["died_at"], 1_700_000_000);
        assert_eq!(value["jobs"][0]["id"], "job-1");

        let (status, body) =
            send(app.clone(), Method::POST, "/delete_dead_job/1700000000/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["error"]["code"], "JOB_NOT_FOUND");

        let (status, _) = send(app.clone(), Method::POST, "/retry_dead_job/1700000000/job-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(redis.list("work:jobs:send_email").len(), 1);

        let (status, body) = send(app, Method::POST, "/retry_all_dead_jobs").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["requeued"], 0);
    }

    #[tokio::test]
    async fn test_bad_page_is_bad_request() {
        let (status, _) = send(unreachable_router(), Method::GET, "/dead_jobs?page=two").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_actions_require_post() {
        let (status, _) = send(unreachable_router(), Method::GET, "/delete_all_dead_jobs").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_metrics_exposes_pool_and_requests() {
        init_metrics().expect("metrics init");
        let app = unreachable_router();

        let (status, _) = send(app.clone(), Method::GET, "/ping").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, Method::GET, "/metrics").await;
        assert_eq!(status, StatusCode::OK);

        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("workwebui_pool_active_connections"));
        assert!(text.contains("workwebui_http_requests_total"));
        assert!(text.contains("route=\"/ping\""));
    }
}
