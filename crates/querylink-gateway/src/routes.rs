use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use querylink_core::protocol::QueryCallback;

use crate::state::AppState;
use crate::stream;

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_queries": state.bridge.pending_count(),
        "active_sessions": state.sessions.active_count(),
    }))
}

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default, rename = "threadId")]
    pub thread_id: Option<String>,
}

// POST /api/chat: streams the response as SSE
pub async fn chat(State(state): State<Arc<AppState>>, Json(body): Json<ChatBody>) -> Response {
    if body.message.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    stream::open(state, body.message, body.thread_id).into_response()
}

// POST /api/query-callback: always acknowledged, known id or not
pub async fn query_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryCallback>,
) -> Json<serde_json::Value> {
    let query_id = body.query_id.clone();
    let resolved = state.bridge.handle_callback(body);
    debug!(query_id = %query_id, resolved, "Query callback received");
    Json(serde_json::json!({ "ok": true, "resolved": resolved }))
}

// GET /api/bridge/pending
pub async fn pending(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let queries = state.bridge.registry().snapshot();
    Json(serde_json::json!({
        "count": queries.len(),
        "queries": queries,
    }))
}

// GET /api/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "sessions": state.sessions.list() }))
}
