//! HTTP server exposing the tempcache operations
//!
//! Provides /health and the /objects/{key} family of endpoints, one per
//! tempcache operation.

use crate::types::{CopyRequest, HealthResponse, PathResponse, PutQuery, StatusResponse};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempcache::{TempcacheError, TempcacheService};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub service: TempcacheService,
    pub import_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(service: TempcacheService, import_dir: Option<PathBuf>) -> Self {
        Self {
            service,
            import_dir,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/objects/{key}", get(get_file).put(put_object_by_stream))
        .route("/objects/{key}/path", get(get_file_path))
        .route("/objects/{key}/stream", get(get_stream))
        .route("/objects/{key}/bump", post(bump_object))
        .route("/objects/{key}/copy", post(put_object_by_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once `shutdown` resolves and open
/// connections have drained
pub async fn start_server<F>(state: SharedState, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.service.store().stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
        queue: state.service.queue_snapshot(),
    })
}

async fn get_file(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.service.get_file(&key).await {
        Ok(data) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn get_file_path(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.service.get_file_path(&key).await {
        Ok(path) => Json(PathResponse { path }).into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn get_stream(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.service.get_stream(&key).await {
        Ok(file) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn bump_object(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.service.bump_object(&key).await {
        Ok(()) => Json(StatusResponse { status: "ok" }).into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn put_object_by_file(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(request): Json<CopyRequest>,
) -> Response {
    let src_path = match resolve_import(state.import_dir.as_deref(), &request.src_path).await {
        Ok(path) => path,
        Err(reason) => {
            warn!(key = %key, src_path = ?request.src_path, "Rejected import: {}", reason);
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: reason })).into_response();
        }
    };

    let initial_life = request.initial_life.map(Duration::from_millis);
    match state
        .service
        .put_object_by_file(&key, src_path, initial_life)
        .await
    {
        Ok(()) => (StatusCode::CREATED, Json(StatusResponse { status: "ok" })).into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn put_object_by_stream(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Query(query): Query<PutQuery>,
    body: Body,
) -> Response {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let source = Box::new(StreamReader::new(Box::pin(stream)));
    let initial_life = query.initial_life.map(Duration::from_millis);

    match state
        .service
        .put_object_by_stream(&key, source, initial_life)
        .await
    {
        Ok(()) => (StatusCode::CREATED, Json(StatusResponse { status: "ok" })).into_response(),
        Err(e) => error_response(&key, e),
    }
}

/// Canonicalize `src` and require it to sit under the import directory.
/// Relative paths are taken relative to that directory.
async fn resolve_import(
    import_dir: Option<&std::path::Path>,
    src: &std::path::Path,
) -> std::result::Result<PathBuf, String> {
    let import_dir = import_dir.ok_or_else(|| "file imports are disabled".to_string())?;
    let import_dir = tokio::fs::canonicalize(import_dir)
        .await
        .map_err(|e| format!("import directory unavailable: {}", e))?;

    let resolved = tokio::fs::canonicalize(import_dir.join(src))
        .await
        .map_err(|_| "srcPath is not an importable file".to_string())?;

    if !resolved.starts_with(&import_dir) {
        return Err("srcPath is outside the import directory".to_string());
    }
    Ok(resolved)
}

fn error_response(key: &str, err: TempcacheError) -> Response {
    let status = match &err {
        TempcacheError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!(key = %key, error = %err, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tempcache::TempcacheConfig;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    async fn create_test_state() -> (TempDir, SharedState) {
        let dir = tempdir().unwrap();
        let config = TempcacheConfig {
            root_dir: dir.path().join("tempcache"),
            bump_strength: Duration::from_millis(5000),
            ..TempcacheConfig::default()
        };
        let service = TempcacheService::new(config).await.unwrap();
        let import_dir = dir.path().join("imports");
        std::fs::create_dir_all(&import_dir).unwrap();
        (dir, Arc::new(ServerState::new(service, Some(import_dir))))
    }

    async fn post_copy(state: &SharedState, key: &str, body: serde_json::Value) -> Response {
        send(
            state,
            Request::builder()
                .method("POST")
                .uri(format!("/objects/{}/copy", key))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn send(state: &SharedState, request: Request<Body>) -> Response {
        create_router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn put(state: &SharedState, key: &str, data: &'static [u8], initial_life: u64) {
        let response = send(
            state,
            Request::builder()
                .method("PUT")
                .uri(format!("/objects/{}?initialLife={}", key, initial_life))
                .body(Body::from(data))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, state) = create_test_state().await;

        let response = send(&state, get_request("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["cache"]["entries"], 0);
        assert_eq!(json["queue"]["mailboxSize"], 0);
    }

    #[tokio::test]
    async fn test_put_then_get_file() {
        let (_dir, state) = create_test_state().await;
        put(&state, "artifact", b"artifact bytes", 2000).await;

        let response = send(&state, get_request("/objects/artifact")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(body_bytes(response).await, b"artifact bytes");

        assert_eq!(
            state.service.store().remaining_life("artifact").await,
            Some(7000)
        );
    }

    #[tokio::test]
    async fn test_get_stream() {
        let (_dir, state) = create_test_state().await;
        put(&state, "big", b"streamed body", 2000).await;

        let response = send(&state, get_request("/objects/big/stream")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"streamed body");
    }

    #[tokio::test]
    async fn test_get_file_path() {
        let (_dir, state) = create_test_state().await;
        put(&state, "p", b"x", 2000).await;

        let response = send(&state, get_request("/objects/p/path")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let expected = state.service.store().root().join("p");
        assert_eq!(json["path"], expected.to_str().unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let (_dir, state) = create_test_state().await;

        for uri in ["/objects/nope", "/objects/nope/path", "/objects/nope/stream"] {
            let response = send(&state, get_request(uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }

        let response = send(
            &state,
            Request::builder()
                .method("POST")
                .uri("/objects/nope/bump")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Key not found: nope");
    }

    #[tokio::test]
    async fn test_bump() {
        let (_dir, state) = create_test_state().await;
        put(&state, "b", b"x", 1000).await;

        let response = send(
            &state,
            Request::builder()
                .method("POST")
                .uri("/objects/b/bump")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.service.store().remaining_life("b").await, Some(6000));
    }

    #[tokio::test]
    async fn test_copy_from_file() {
        let (dir, state) = create_test_state().await;
        let src = dir.path().join("imports").join("source.bin");
        std::fs::write(&src, b"on disk").unwrap();

        let response = post_copy(
            &state,
            "copied",
            serde_json::json!({ "srcPath": src, "initialLife": 3000 }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            state.service.store().remaining_life("copied").await,
            Some(3000)
        );

        // Relative paths resolve against the import directory
        let response = post_copy(&state, "relative", serde_json::json!({ "srcPath": "source.bin" })).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.service.get_file("relative").await.unwrap(), b"on disk");
    }

    #[tokio::test]
    async fn test_copy_from_missing_file_fails() {
        let (dir, state) = create_test_state().await;

        let src = dir.path().join("imports").join("missing");
        let response = post_copy(&state, "copied", serde_json::json!({ "srcPath": src })).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!state.service.store().contains("copied").await);
    }

    #[tokio::test]
    async fn test_copy_outside_import_dir_is_rejected() {
        let (dir, state) = create_test_state().await;
        let outside = dir.path().join("secret.txt");
        std::fs::write(&outside, b"not for you").unwrap();

        for src in [
            serde_json::json!("/etc/passwd"),
            serde_json::json!(outside),
            serde_json::json!("../secret.txt"),
        ] {
            let response = post_copy(&state, "loot", serde_json::json!({ "srcPath": src })).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", src);
        }

        assert!(!state.service.store().contains("loot").await);
        let response = send(&state, get_request("/objects/loot")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_copy_without_import_dir_is_disabled() {
        let dir = tempdir().unwrap();
        let config = TempcacheConfig {
            root_dir: dir.path().join("tempcache"),
            ..TempcacheConfig::default()
        };
        let service = TempcacheService::new(config).await.unwrap();
        let state: SharedState = Arc::new(ServerState::new(service, None));
        let src = dir.path().join("source.bin");
        std::fs::write(&src, b"on disk").unwrap();

        let response = post_copy(&state, "copied", serde_json::json!({ "srcPath": src })).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "file imports are disabled");
    }

    #[tokio::test]
    async fn test_encoded_traversal_key_is_rejected() {
        let (dir, state) = create_test_state().await;

        let response = send(
            &state,
            Request::builder()
                .method("PUT")
                .uri("/objects/..%2Fescape")
                .body(Body::from("nope"))
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!dir.path().join("escape").exists());
    }
}
