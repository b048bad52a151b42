use axum::{Json, extract::State};

use super::super::AppState;
use crate::core::relay::ServiceStatus;

/// Probe every collaborator concurrently. Overall status is `healthy` only
/// when nothing reports unhealthy or unreachable.
pub async fn health_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (ollama, kokoro, policy) = tokio::join!(
        state.ollama.health(),
        state.kokoro.health(),
        state.policy.health()
    );

    let app = ServiceStatus::Healthy;
    let degraded = [app, ollama, kokoro, policy]
        .into_iter()
        .any(ServiceStatus::degrades);

    Json(serde_json::json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "services": {
            "app": app,
            "ollama": ollama,
            "kokoro": kokoro,
            "policy": policy,
        },
    }))
}
