use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::core::approval::{ApprovalVerdict, PolicyAction};
use crate::core::stream::{SessionError, StreamRequest};

#[derive(Deserialize)]
pub struct StreamTaskRequest {
    #[serde(default)]
    description: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    resume_session_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SessionApprovalRequest {
    session_id: String,
    approved: bool,
}

/// Run a task with the agent's progress pushed as server-sent frames.
/// Closing the connection stops the agent.
pub async fn stream_task(
    State(state): State<AppState>,
    Json(payload): Json<StreamTaskRequest>,
) -> Response {
    let description = payload.description.trim().to_string();
    if description.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No task description provided");
    }

    let path = state
        .config
        .resolve_project(payload.project.as_deref(), payload.path.as_deref());
    let session_id = uuid::Uuid::new_v4().to_string();
    let action = PolicyAction::coding_task(
        &description,
        serde_json::json!({ "path": path.display().to_string(), "mode": "streaming" }),
    );

    let supervised = match state
        .policy
        .evaluate(&action, &state.policy_context(&session_id))
        .await
    {
        ApprovalVerdict::Allow => false,
        ApprovalVerdict::AllowWithApproval => true,
        ApprovalVerdict::Deny { reasons } => {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "success": false,
                    "error": "Task denied by policy",
                    "reasons": reasons,
                })),
            )
                .into_response();
        }
    };

    info!(
        "Streaming task [{}] accepted (supervised: {})",
        session_id, supervised
    );
    let (_, rx) = state.streaming.start_with_id(
        session_id,
        StreamRequest {
            description,
            path,
            supervised,
            resume_session_id: payload.resume_session_id,
        },
    );

    let stream = ReceiverStream::new(rx)
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.to_json())));
    Sse::new(stream).into_response()
}

pub async fn approve_session(
    State(state): State<AppState>,
    Json(payload): Json<SessionApprovalRequest>,
) -> Response {
    match state
        .streaming
        .sessions()
        .submit_decision(&payload.session_id, payload.approved)
    {
        Ok(()) => Json(serde_json::json!({
            "success": true,
            "session_id": payload.session_id,
            "approved": payload.approved,
        }))
        .into_response(),
        Err(e @ SessionError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ SessionError::NotPending(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "sessions": state.streaming.sessions().list(),
    }))
}
