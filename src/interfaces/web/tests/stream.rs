use std::path::Path;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use super::{json_request, test_config, test_state};
use crate::core::approval::ApprovalVerdict;
use crate::interfaces::web::build_api_router;
use crate::platform::{NativePlatform, Platform};

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"agent-9"}"#;
const RESULT: &str = r#"{"type":"result","subtype":"success","result":"All done","session_id":"agent-9"}"#;

fn fake_agent(dir: &Path, body: &str) -> String {
    let path = dir.join("agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    NativePlatform::set_executable(&path);
    path.to_string_lossy().to_string()
}

fn app_with(dir: &Path, body: &str, verdict: ApprovalVerdict) -> Router {
    let binary = fake_agent(dir, body);
    let (state, _) = test_state(test_config(&binary, dir), verdict);
    build_api_router(state)
}

fn stream_request(description: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/tasks/stream")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "description": description }).to_string(),
        ))
        .unwrap()
}

/// Payloads of every `data:` line in an SSE body.
fn sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .filter_map(|d| serde_json::from_str(d.trim()).ok())
        .collect()
}

#[tokio::test]
async fn stream_emits_session_start_through_complete() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("echo '{}'\necho '{}'", INIT, RESULT);
    let app = app_with(dir.path(), &body, ApprovalVerdict::Allow);

    let resp = app.oneshot(stream_request("Fix typo")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let frames = sse_frames(&String::from_utf8_lossy(&bytes));
    assert_eq!(frames.first().unwrap()["type"], "session_start");
    assert_eq!(frames.first().unwrap()["supervised"], false);

    let complete = frames.last().unwrap();
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["success"], true);
    assert_eq!(complete["agent_session_id"], "agent-9");
}

#[tokio::test]
async fn approval_verdict_runs_supervised() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("echo '{}'", RESULT);
    let app = app_with(dir.path(), &body, ApprovalVerdict::AllowWithApproval);

    let resp = app.oneshot(stream_request("Refactor")).await.unwrap();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let frames = sse_frames(&String::from_utf8_lossy(&bytes));
    assert_eq!(frames[0]["supervised"], true);
}

#[tokio::test]
async fn denied_stream_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(
        dir.path(),
        "true",
        ApprovalVerdict::Deny {
            reasons: vec!["no".to_string()],
        },
    );
    let resp = app.oneshot(stream_request("Wipe disk")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn side_channel_rejects_unknown_and_idle_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(dir.path(), "sleep 5", ApprovalVerdict::Allow);

    let (status, _) = json_request(
        app.clone(),
        Method::POST,
        "/api/tasks/stream/approve",
        Some(json!({ "session_id": "missing", "approved": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // keep the response alive so the session stays registered
    let resp = app.clone().oneshot(stream_request("Wait")).await.unwrap();
    let (_, sessions) =
        json_request(app.clone(), Method::GET, "/api/tasks/stream/sessions", None).await;
    let live = sessions["sessions"].as_array().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0]["pending_approval"], false);
    let session_id = live[0]["session_id"].as_str().unwrap().to_string();

    let (status, _) = json_request(
        app,
        Method::POST,
        "/api/tasks/stream/approve",
        Some(json!({ "session_id": session_id, "approved": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    drop(resp);
}
