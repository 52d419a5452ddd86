//! Deckster HTTP REST API
//!
//! Axum server exposing ingestion, generation and ledger stats. Runs
//! alongside the Unix socket IPC server.
//!
//! Each endpoint is a thin axum handler over an inner function that takes
//! the shared [`AppContext`] and returns `(StatusCode, Value)`, so the logic
//! is testable without axum dispatch.
//!
//! Endpoints:
//! - GET  /health                      health check with storage status
//! - GET  /version                     server version info
//! - POST /files/upload                multipart upload (session_id, user_id?, file)
//! - GET  /sessions/:session_id/files  files ingested for a session
//! - POST /content/generate            slide content generation
//! - POST /rag/file/overview           themes, data points and structure of a session's files
//! - POST /rag/file/detailed           cited content chunks for a query
//! - GET  /ledger/stats                aggregate generation metrics

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use deckster_core::ipc::{guess_media_type, DecksterRequest, DecksterResponse};
use deckster_core::models::{DetailedRequest, GenerationRequest, OverviewRequest};
use deckster_core::DecksterError;
use deckster_ingest::Upload;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router::{self, AppContext};

/// Room for multipart framing and text fields around the file part.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the Axum router with all endpoints
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    // Oversized files must reach the pipeline's size check, so the body
    // limit sits well above the configured maximum.
    let body_limit = (ctx.config.ingestion.max_file_bytes as usize)
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/files/upload", post(upload_handler))
        .route("/sessions/:session_id/files", get(list_files_handler))
        .route("/content/generate", post(generate_handler))
        .route("/rag/file/overview", post(overview_handler))
        .route("/rag/file/detailed", post(detailed_handler))
        .route("/ledger/stats", get(stats_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    ctx: Arc<AppContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);

    let app = build_router(ctx);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Deckster HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// A parsed multipart upload.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub file_name: Option<String>,
    pub media_type: Option<String>,
    pub bytes: Option<Bytes>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            error_code: code.into(),
            status: "error".to_string(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"status": "error"}))
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    let response = router::handle_request(DecksterRequest::Health, ctx).await;
    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
                obj.insert("socket".to_string(), serde_json::json!(ctx.config.service.socket_path));
            }
            (StatusCode::OK, data)
        }
        Err((_, msg)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": msg,
            }),
        ),
    }
}

/// Inner version: pure, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "deckster/1",
    })
}

pub async fn upload_inner(ctx: &AppContext, form: UploadForm) -> (StatusCode, serde_json::Value) {
    let session_id = match form.session_id {
        Some(s) if !s.trim().is_empty() => s,
        _ => return error_body(&DecksterError::InvalidUpload("session_id field is required".to_string())),
    };
    let bytes = match form.bytes {
        Some(b) => b,
        None => return error_body(&DecksterError::InvalidUpload("file field is required".to_string())),
    };

    let name = form.file_name.unwrap_or_default();
    // Generic client content types fall back to the extension.
    let media_type = form
        .media_type
        .filter(|m| m != "application/octet-stream")
        .unwrap_or_else(|| guess_media_type(&name).to_string());
    let upload = Upload { name, media_type, bytes };

    match ctx
        .pipeline
        .ingest(&session_id, form.user_id.as_deref(), upload)
        .await
    {
        Ok(file) => match serde_json::to_value(&file) {
            Ok(v) => (StatusCode::OK, v),
            Err(e) => error_body(&DecksterError::Other(e.to_string())),
        },
        Err(e) => error_body(&e),
    }
}

pub async fn list_files_inner(ctx: &AppContext, session_id: String) -> (StatusCode, serde_json::Value) {
    let response = router::handle_request(DecksterRequest::ListFiles { session_id }, ctx).await;
    ipc_to_http(response)
}

pub async fn generate_inner(ctx: &AppContext, req: GenerationRequest) -> (StatusCode, serde_json::Value) {
    let response = router::handle_request(
        DecksterRequest::Generate {
            session_id: req.session_id,
            prompt: req.prompt,
            slide_type: req.slide_type,
            context: req.context,
            request_id: req.request_id,
            user_id: req.user_id,
        },
        ctx,
    )
    .await;
    ipc_to_http(response)
}

pub async fn overview_inner(ctx: &AppContext, req: OverviewRequest) -> (StatusCode, serde_json::Value) {
    ipc_to_http(router::handle_request(DecksterRequest::Overview(req), ctx).await)
}

pub async fn detailed_inner(ctx: &AppContext, req: DetailedRequest) -> (StatusCode, serde_json::Value) {
    ipc_to_http(router::handle_request(DecksterRequest::Detailed(req), ctx).await)
}

pub async fn stats_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    ipc_to_http(router::handle_request(DecksterRequest::Stats, ctx).await)
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let (status, body) = health_inner(&ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn upload_handler(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let (status, body) = match read_upload_form(multipart).await {
        Ok(form) => upload_inner(&ctx, form).await,
        Err((status, body)) => (status, body),
    };
    (status, Json(body))
}

pub async fn list_files_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = list_files_inner(&ctx, session_id).await;
    (status, Json(body))
}

pub async fn generate_handler(
    State(ctx): State<Arc<AppContext>>,
    payload: std::result::Result<Json<GenerationRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => generate_inner(&ctx, req).await,
        Err(rejection) => rejection_body(rejection),
    };
    (status, Json(body))
}

pub async fn overview_handler(
    State(ctx): State<Arc<AppContext>>,
    payload: std::result::Result<Json<OverviewRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => overview_inner(&ctx, req).await,
        Err(rejection) => rejection_body(rejection),
    };
    (status, Json(body))
}

pub async fn detailed_handler(
    State(ctx): State<Arc<AppContext>>,
    payload: std::result::Result<Json<DetailedRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => detailed_inner(&ctx, req).await,
        Err(rejection) => rejection_body(rejection),
    };
    (status, Json(body))
}

pub async fn stats_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let (status, body) = stats_inner(&ctx).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

async fn read_upload_form(
    mut multipart: Multipart,
) -> std::result::Result<UploadForm, (StatusCode, serde_json::Value)> {
    let mut form = UploadForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "session_id" => form.session_id = Some(field.text().await.map_err(multipart_error)?),
            "user_id" => {
                let user = field.text().await.map_err(multipart_error)?;
                form.user_id = Some(user).filter(|u| !u.trim().is_empty());
            }
            "file" => {
                form.file_name = field.file_name().map(str::to_string);
                form.media_type = field.content_type().map(str::to_string);
                form.bytes = Some(field.bytes().await.map_err(multipart_error)?);
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }
    Ok(form)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> (StatusCode, serde_json::Value) {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let body = ErrorResponse::new("FILE_SIZE_EXCEEDED", e.body_text()).into_value();
        return (StatusCode::BAD_REQUEST, body);
    }
    let body = ErrorResponse::new("INVALID_UPLOAD", e.body_text()).into_value();
    (StatusCode::BAD_REQUEST, body)
}

/// Malformed or mistyped JSON bodies are caller errors like any other.
fn rejection_body(rejection: JsonRejection) -> (StatusCode, serde_json::Value) {
    tracing::debug!(error = %rejection, "Rejected request body");
    let body = ErrorResponse::new("INVALID_REQUEST", rejection.body_text()).into_value();
    (StatusCode::BAD_REQUEST, body)
}

/// HTTP status for a stable error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "FILE_SIZE_EXCEEDED" | "INVALID_UPLOAD" | "INVALID_REQUEST" => StatusCode::BAD_REQUEST,
        "MAX_FILES_EXCEEDED" => StatusCode::CONFLICT,
        "FILE_INGESTION_FAILED" | "STORE_CREATION_FAILED" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(e: &DecksterError) -> (StatusCode, serde_json::Value) {
    let code = e.error_code();
    (status_for_code(code), ErrorResponse::new(code, e.to_string()).into_value())
}

/// Convert an IPC `DecksterResponse` into an HTTP body value, or `(code, message)`.
pub fn response_to_http(
    response: DecksterResponse,
) -> std::result::Result<serde_json::Value, (String, String)> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err((
            response.error_code.unwrap_or_else(|| "INTERNAL".to_string()),
            response.error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

fn ipc_to_http(response: DecksterResponse) -> (StatusCode, serde_json::Value) {
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err((code, msg)) => (status_for_code(&code), ErrorResponse::new(code, msg).into_value()),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
