use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::AgentError;
use crate::gateway::AppState;

/// Header carrying the conversation id.
pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    message: String,
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::SessionConflict(_) => StatusCode::CONFLICT,
        AgentError::Transport(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `POST /api/chat` — run one turn.  `X-Session-ID` selects the session;
/// a missing or unknown id starts a new one.
pub(crate) async fn api_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Response {
    let session_id = session_header(&headers);

    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "session_id": session_id,
                "error": "message must not be empty",
                "kind": "validation",
            })),
        )
            .into_response();
    }

    match state.runtime.turn(session_id.as_deref(), &body.message).await {
        Ok(report) => Json(json!({
            "session_id": report.session_id,
            "response": report.reply,
            "additional_data": {
                "tool_calls": report.tool_calls,
                "model_calls": report.model_calls,
                "tokens": report.tokens,
                "hit_iteration_cap": report.hit_iteration_cap,
            },
        }))
        .into_response(),
        Err(failure) => (
            status_for(&failure.error),
            Json(json!({
                "session_id": failure.session_id,
                "error": failure.error.to_string(),
                "kind": failure.error.kind(),
            })),
        )
            .into_response(),
    }
}

/// `GET /api/chat/:session_id` — history snapshot.
pub(crate) async fn api_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.runtime.sessions().history(&session_id).await {
        Some(history) => Json(json!({
            "session_id": session_id,
            "history": history,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "session_id": session_id,
                "error": "session not found",
            })),
        )
            .into_response(),
    }
}

/// `DELETE /api/chat/:session_id` — forget a session.
pub(crate) async fn api_chat_delete(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let existed = state.runtime.clear(&session_id);
    let (status, message) = if existed {
        ("cleared", format!("Chat session {session_id} cleared"))
    } else {
        ("not_found", format!("Chat session {session_id} not found"))
    };
    Json(json!({
        "session_id": session_id,
        "existed": existed,
        "status": status,
        "message": message,
    }))
}
