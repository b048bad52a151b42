use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::core::approval::{ApprovalVerdict, PolicyAction};
use crate::core::jobs::{JobApprovalError, JobState};

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    description: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
pub struct ApproveTaskRequest {
    approved: bool,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Response {
    let description = payload.description.trim();
    if description.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No task description provided");
    }

    let path = state
        .config
        .resolve_project(payload.project.as_deref(), payload.path.as_deref());
    let job_id = uuid::Uuid::new_v4().to_string();
    let action = PolicyAction::coding_task(
        description,
        serde_json::json!({ "path": path.display().to_string(), "mode": "background" }),
    );

    let verdict = state
        .policy
        .evaluate(&action, &state.policy_context(&job_id))
        .await;
    if let ApprovalVerdict::Deny { reasons } = &verdict {
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

    state.jobs().create(&job_id, description, path);
    if verdict == ApprovalVerdict::AllowWithApproval {
        state.background.hold_for_approval(&job_id).await;
    } else {
        state.background.dispatch(&job_id);
    }
    info!("Task [{}] accepted: {}", job_id, description);

    let job_state = state
        .jobs()
        .get(&job_id)
        .map(|j| j.state)
        .unwrap_or(JobState::Queued);
    Json(serde_json::json!({
        "success": true,
        "job_id": job_id,
        "state": job_state,
    }))
    .into_response()
}

pub async fn list_tasks(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "tasks": state.jobs().list() }))
}

pub async fn get_task(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.jobs().get(&id) {
        Some(job) => Json(serde_json::json!({ "success": true, "task": job })).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Task {} not found", id)),
    }
}

pub async fn approve_task(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<ApproveTaskRequest>,
) -> Response {
    match state.background.decide(&id, payload.approved).await {
        Ok(job_state) => Json(serde_json::json!({
            "success": true,
            "job_id": id,
            "state": job_state,
        }))
        .into_response(),
        Err(e @ JobApprovalError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e @ JobApprovalError::NotPending { .. }) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
    }
}
