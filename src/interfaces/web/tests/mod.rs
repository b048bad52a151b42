mod api;
#[cfg(unix)]
mod stream;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use super::AppState;
use crate::core::approval::{ApprovalVerdict, PolicyAction, PolicyContext, PolicyGate};
use crate::core::config::AppConfig;
use crate::core::notify::InMemoryNotificationSink;

/// Answers every evaluation with the same verdict.
pub(super) struct StaticGate(pub ApprovalVerdict);

#[async_trait]
impl PolicyGate for StaticGate {
    async fn evaluate(&self, _action: &PolicyAction, _context: &PolicyContext) -> ApprovalVerdict {
        self.0.clone()
    }
}

/// A local URL nothing listens on.
pub(super) fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

pub(super) fn test_config(binary: &str, workdir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.agent.binary = binary.to_string();
    config.projects.default_path = workdir.to_path_buf();
    config.chat.ollama_url = dead_url();
    config.tts.kokoro_url = dead_url();
    config.notifications.persist = false;
    config
}

pub(super) fn test_state(
    config: AppConfig,
    verdict: ApprovalVerdict,
) -> (AppState, Arc<InMemoryNotificationSink>) {
    let notifier = Arc::new(InMemoryNotificationSink::new(50));
    let (log_tx, _) = tokio::sync::broadcast::channel(16);
    let state = AppState::with_services(
        config,
        Arc::new(StaticGate(verdict)),
        notifier.clone(),
        log_tx,
    );
    (state, notifier)
}

pub(super) async fn json_request(
    app: Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body = match body {
        Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
    (status, json)
}
