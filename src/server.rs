//! HTTP trigger and read API
//!
//! Thin plumbing over the [`Reconciler`]; no reconciliation logic lives here.
//!
//! # Routes
//!
//! - `GET|POST /api/sync/{project}` - Reconcile a project now
//! - `GET /api/issues/{project}` - Mirror rows (`?status=...&include_inactive=true`)
//! - `GET /api/runs/{project}` - Recent sync runs (`?limit=...`)
//! - `GET /health` - Liveness plus row counts
//! - `GET /metrics` - Prometheus text format
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskmirror::server::MirrorServer;
//! # use taskmirror::reconcile::Reconciler;
//!
//! # async fn demo(reconciler: Arc<Reconciler>) {
//! MirrorServer::new(reconciler)
//!     .run("127.0.0.1:8000")
//!     .await
//!     .expect("Server failed");
//! # }
//! ```

use crate::metrics;
use crate::mirror::{validate_project_key, IssueFilter, MirrorIssue, SyncRun};
use crate::reconcile::{Reconciler, SyncReport};
use crate::MirrorError;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_RUN_LIMIT: usize = 20;

/// Shared handler state
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

/// HTTP server exposing the sync trigger
pub struct MirrorServer {
    state: Arc<AppState>,
}

impl MirrorServer {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            state: Arc::new(AppState { reconciler }),
        }
    }

    /// Build the router; unsupported methods on known routes get 405
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(prometheus_metrics))
            .route("/api/sync/{project}", get(sync_project).post(sync_project))
            .route("/api/issues/{project}", get(list_issues))
            .route("/api/runs/{project}", get(list_runs))
            .with_state(state)
    }

    /// Serve until the listener fails
    pub async fn run(self, addr: &str) -> crate::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MirrorError::Other(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = addr, "Mirror server listening");
        metrics::set_health_status(true);

        axum::serve(listener, Self::router(self.state))
            .await
            .map_err(MirrorError::Io)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// Query string for `/api/issues/{project}`
#[derive(Debug, Default, Deserialize)]
pub struct IssuesQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

impl From<IssuesQuery> for IssueFilter {
    fn from(query: IssuesQuery) -> Self {
        IssueFilter {
            status: query.status.filter(|s| !s.is_empty()),
            include_inactive: query.include_inactive,
        }
    }
}

/// Query string for `/api/runs/{project}`
#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

/// Response for `/api/runs/{project}`
#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub last_successful: Option<SyncRun>,
    pub runs: Vec<SyncRun>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Status code for a failed operation, classified by its underlying kind
pub fn status_for(error: &MirrorError) -> StatusCode {
    match error.root() {
        MirrorError::InvalidProjectKey(_) => StatusCode::BAD_REQUEST,
        MirrorError::RemoteAuthFailed(_) | MirrorError::RemoteRequestFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        MirrorError::RemoteUnreachable(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: MirrorError) -> ApiError {
    (
        status_for(&error),
        Json(ErrorResponse {
            kind: error.kind().to_string(),
            error: error.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let store = state.reconciler.store().lock().await;
    let stats = store.stats().map_err(api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "issues": stats })))
}

async fn prometheus_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::encode_metrics().map_err(api_error)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

async fn sync_project(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state
        .reconciler
        .sync_project(&project)
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

async fn list_issues(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(query): Query<IssuesQuery>,
) -> Result<Json<Vec<MirrorIssue>>, ApiError> {
    validate_project_key(&project).map_err(api_error)?;

    let store = state.reconciler.store().lock().await;
    let issues = store
        .list_issues(&project, &query.into())
        .map_err(api_error)?;
    Ok(Json(issues))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<RunsResponse>, ApiError> {
    validate_project_key(&project).map_err(api_error)?;

    let store = state.reconciler.store().lock().await;
    let runs = store
        .recent_runs(&project, query.limit.unwrap_or(DEFAULT_RUN_LIMIT))
        .map_err(api_error)?;
    let last_successful = store.last_successful_sync(&project).map_err(api_error)?;
    Ok(Json(RunsResponse {
        last_successful,
        runs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{FetchedIssues, IssueSource};
    use crate::mirror::{CandidateIssue, MirrorStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    struct FixedSource;

    #[async_trait]
    impl IssueSource for FixedSource {
        async fn fetch_project_issues(&self, project_key: &str) -> crate::Result<FetchedIssues> {
            match project_key {
                "DENIED" => Err(MirrorError::RemoteAuthFailed("HTTP 401".to_string())),
                "DOWN" => Err(MirrorError::RemoteUnreachable("timed out".to_string())),
                _ => Ok(FetchedIssues::new(vec![
                    CandidateIssue::new(format!("{}-1", project_key), project_key, "One", "To Do"),
                    CandidateIssue::new(
                        format!("{}-2", project_key),
                        project_key,
                        "Two",
                        "In Progress",
                    ),
                ])),
            }
        }
    }

    fn create_test_state() -> Arc<AppState> {
        let store = MirrorStore::open_in_memory().unwrap();
        let reconciler = Reconciler::new(Arc::new(FixedSource), Arc::new(Mutex::new(store)));
        Arc::new(AppState {
            reconciler: Arc::new(reconciler),
        })
    }

    async fn send(state: Arc<AppState>, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = MirrorServer::router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = send(create_test_state(), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["issues"]["total"], 0);
    }

    #[tokio::test]
    async fn test_sync_get_and_post() {
        let state = create_test_state();

        let (status, body) = send(state.clone(), "POST", "/api/sync/TKP").await;
        assert_eq!(status, StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["project_key"], "TKP");
        assert_eq!(report["inserted"], 2);

        let (status, body) = send(state, "GET", "/api/sync/TKP").await;
        assert_eq!(status, StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["updated"], 2);
        assert_eq!(report["inserted"], 0);
    }

    #[tokio::test]
    async fn test_sync_rejects_other_methods() {
        let state = create_test_state();
        for method in ["PUT", "DELETE", "PATCH"] {
            let (status, _) = send(state.clone(), method, "/api/sync/TKP").await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{}", method);
        }
        let store = state.reconciler.store().lock().await;
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_sync_error_status_codes() {
        let state = create_test_state();

        let (status, body) = send(state.clone(), "POST", "/api/sync/DENIED").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.kind, "remote_auth_failed");

        let (status, _) = send(state.clone(), "POST", "/api/sync/DOWN").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let (status, body) = send(state, "POST", "/api/sync/1BAD").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.kind, "invalid_project_key");
    }

    #[tokio::test]
    async fn test_list_issues_with_filters() {
        let state = create_test_state();
        send(state.clone(), "POST", "/api/sync/TKP").await;

        let (status, body) = send(state.clone(), "GET", "/api/issues/TKP").await;
        assert_eq!(status, StatusCode::OK);
        let issues: Vec<MirrorIssue> = serde_json::from_slice(&body).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].external_id, "TKP-1");

        let (_, body) = send(state, "GET", "/api/issues/TKP?status=In%20Progress").await;
        let issues: Vec<MirrorIssue> = serde_json::from_slice(&body).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].external_id, "TKP-2");
    }

    #[tokio::test]
    async fn test_list_runs() {
        let state = create_test_state();
        send(state.clone(), "POST", "/api/sync/TKP").await;

        let (status, body) = send(state, "GET", "/api/runs/TKP?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["runs"].as_array().unwrap().len(), 1);
        assert_eq!(json["last_successful"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = create_test_state();
        send(state.clone(), "POST", "/api/sync/TKP").await;

        let (status, body) = send(state, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("taskmirror_sync_runs_total"));
    }
}
