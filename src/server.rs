//! HTTP surface: the chat stream endpoint, the bearer-auth capability, and a
//! health check.
//!
//! The stream handler is two-phase. Resolution and the blocking stage run
//! first, so configuration failures still map to real status codes (404/400/
//! 500 with a `{"detail": ...}` body). Only then is the `text/event-stream`
//! response committed, fed by a channel the pipeline task writes into; from
//! that point every failure is an in-band `error` event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::{ChatPipeline, ChatStreamRequest};
use crate::store::{ApiKey, ConfigStore};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub pipeline: Arc<ChatPipeline>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/stream", post(chat_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Extract the inbound credential from the `Authorization` header.
/// Accepts `Bearer <key>`, `ApiKey <key>`, or the bare key.
fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let key = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("ApiKey "))
        .unwrap_or(value)
        .trim();
    (!key.is_empty()).then(|| key.to_string())
}

/// The auth capability every pipeline invocation sits behind: the extracted
/// credential must match an active ApiKey row.
fn authorize(store: &ConfigStore, headers: &HeaderMap) -> Result<ApiKey, Response> {
    let Some(key) = bearer_from_headers(headers) else {
        return Err(error_body(
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header",
        ));
    };
    store.authenticate(&key).ok_or_else(|| {
        error_body(StatusCode::UNAUTHORIZED, "Invalid or inactive API key")
    })
}

fn error_body(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({"detail": detail.into()}))).into_response()
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    let api_key = match authorize(&state.store, &headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    info!(api_key = %api_key.name, "chat stream authorized");

    let prepared = match state.pipeline.prepare(request).await {
        Ok(prepared) => prepared,
        Err(e) => return error_body(status_for(&e), e.to_string()),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move { pipeline.stream(prepared, tx).await });

    let frames =
        UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_frame()));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(frames))
        .expect("static response headers are valid")
}
