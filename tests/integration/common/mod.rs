//! In-process mock of the analysis backend.
//!
//! Serves the `/api` surface from memory. The generation endpoint picks its
//! canned stream by prompt template name so each test can choose a scenario.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use sieve_core::{Config, ControlPanel};
use tokio::sync::Mutex;

/// Snippet produced by the `ok.txt` scenario.
pub const OK_SNIPPET: &str = "result_df = df[df['label'] == 'λ']";

/// Shared mock state, inspected by tests after a call.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub config: Mutex<Value>,
    pub config_saves: AtomicUsize,
    pub last_generation: Mutex<Option<Value>>,
    pub uploads: AtomicUsize,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            config: Mutex::new(json!({
                "api_key": "",
                "starred_models": ["m-1"],
                "all_models": [],
                "selected_model": ""
            })),
            ..Default::default()
        }
    }
}

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the mock backend and returns its base URL and state.
pub async fn spawn_mock_backend() -> (String, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::new());
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let router = Router::new()
        .route("/api/config", get(get_config).post(save_config))
        .route("/api/prompts", get(list_prompts))
        .route("/api/validate-key", post(validate_key))
        .route("/api/models", get(list_models))
        .route("/api/parse-files", post(parse_files))
        .route("/api/learn-filter-stream", post(learn_filter_stream))
        .route("/api/execute", post(execute))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), backend)
}

/// Builds a panel pointed at `base_url`.
pub fn panel_for(base_url: &str, chunk_timeout_secs: u64) -> ControlPanel {
    let config = Config {
        backend_url: base_url.to_string(),
        chunk_timeout_secs,
        request_timeout_secs: 5,
        ..Default::default()
    };
    ControlPanel::new(config).expect("Failed to build panel")
}

/// Writes a throwaway workbook file and returns its path.
pub fn workbook(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("sieve_integration_uploads");
    std::fs::create_dir_all(&dir).expect("Failed to create upload dir");
    let path = dir.join(name);
    std::fs::write(&path, b"PK\x03\x04 not really a workbook").expect("Failed to write workbook");
    path
}

/// Loads the mock wallets and selects `addresses`.
pub async fn loaded_panel(base_url: &str, chunk_timeout_secs: u64, addresses: &str) -> ControlPanel {
    let panel = panel_for(base_url, chunk_timeout_secs);
    panel
        .load_wallets(&[workbook("week.xlsx")])
        .await
        .expect("Failed to load wallets");
    panel.apply_bulk_input(addresses).await;
    panel
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_config(State(backend): State<Arc<MockBackend>>) -> Json<Value> {
    Json(backend.config.lock().await.clone())
}

async fn save_config(
    State(backend): State<Arc<MockBackend>>,
    Json(config): Json<Value>,
) -> Json<Value> {
    *backend.config.lock().await = config;
    backend.config_saves.fetch_add(1, Ordering::SeqCst);
    Json(json!({"status": "success"}))
}

async fn list_prompts() -> Json<Value> {
    Json(json!(["fail.txt", "ok.txt", "stall.txt"]))
}

async fn validate_key(Json(body): Json<Value>) -> Response {
    if body["api_key"] == "good-key" {
        Json(json!({"valid": true})).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"valid": false, "error": "401 Client Error: Unauthorized"})),
        )
            .into_response()
    }
}

async fn list_models(State(backend): State<Arc<MockBackend>>) -> Response {
    let has_key = backend.config.lock().await.get("api_key") != Some(&json!(""));
    if !has_key {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "401 Client Error: Unauthorized"})),
        )
            .into_response();
    }
    Json(json!(["m-1", "m-2"])).into_response()
}

async fn parse_files(State(backend): State<Arc<MockBackend>>, mut multipart: Multipart) -> Response {
    let mut files = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("files") && field.bytes().await.is_ok() {
            files += 1;
        }
    }
    if files == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No files uploaded"})),
        )
            .into_response();
    }
    backend.uploads.fetch_add(files, Ordering::SeqCst);

    Json(json!({
        "wallets": [
            {"wallet_address": "AAA", "performance_and_risk": {"pnl_sol": 12.5, "roi_percent": 48.0}},
            {"wallet_address": "BBB", "performance_and_risk": {"pnl_sol": -3.0, "roi_percent": -9.5}},
            {"wallet_address": null, "performance_and_risk": {"pnl_sol": 0.1, "roi_percent": 1.0}},
            {"wallet_address": "CCC", "performance_and_risk": {"pnl_sol": 7.25, "roi_percent": 20.0}}
        ]
    }))
    .into_response()
}

async fn learn_filter_stream(
    State(backend): State<Arc<MockBackend>>,
    Json(body): Json<Value>,
) -> Response {
    let template = body["promptTemplate"].as_str().unwrap_or_default().to_string();
    *backend.last_generation.lock().await = Some(body);

    match template.as_str() {
        "ok.txt" => event_stream(ok_chunks()),
        "fail.txt" => event_stream(vec![
            b"data: {\"token\": \"foo\"}\n\n".to_vec(),
            b"data: {\"token\": \"bar\"}\n\n".to_vec(),
            b"data: {\"error\": \"Request timed out.\"}\n\n".to_vec(),
            b"data: {\"token\": \"never\"}\n\n".to_vec(),
        ]),
        "burst.txt" => event_stream(vec![
            b"data:{\"token\":\"foo\"}\n\ndata:{\"token\":\"bar\"}\n\ndata:{\"error\":\"boom\"}\n\n".to_vec(),
        ]),
        "stall.txt" => {
            let first = stream::iter(vec![Ok::<_, Infallible>(
                b"data: {\"token\": \"partial\"}\n\n".to_vec(),
            )]);
            sse_response(Body::from_stream(first.chain(stream::pending())))
        }
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error reading prompt file: {other}"),
        )
            .into_response(),
    }
}

async fn execute(Json(body): Json<Value>) -> Response {
    let code = body["code"].as_str().unwrap_or_default();
    if code.contains("boom") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Code execution failed: boom"})),
        )
            .into_response();
    }
    Json(json!({
        "results": [
            {"wallet_address": "AAA", "performance_and_risk": {"pnl_sol": 12.5, "roi_percent": 48.0}}
        ]
    }))
    .into_response()
}

// ============================================================================
// Stream helpers
// ============================================================================

/// The `ok.txt` stream, cut so one chunk ends inside a JSON key and another
/// inside the two-byte 'λ'.
fn ok_chunks() -> Vec<Vec<u8>> {
    let body = concat!(
        "data: {\"token\": \"result_df = \"}\n\n",
        "data: {not json}\n\n",
        "data: {\"token\": \"df[df['label'] == 'λ']\"}\n\n",
    )
    .as_bytes();

    let lambda = body
        .iter()
        .position(|&b| b == 0xCE)
        .expect("stream contains lambda");
    let cuts = [10, 40, lambda + 1, body.len()];

    let mut chunks = Vec::new();
    let mut start = 0;
    for end in cuts {
        chunks.push(body[start..end].to_vec());
        start = end;
    }
    chunks
}

fn event_stream(chunks: Vec<Vec<u8>>) -> Response {
    let paced = stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, Infallible>(chunk)
    });
    sse_response(Body::from_stream(paced))
}

fn sse_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
