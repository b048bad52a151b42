use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use super::AppState;

/// Lowercase hex SHA-256 of a raw bearer token, as stored in
/// `server.token_hashes`.
pub(crate) fn hash_token(raw: &str) -> String {
    Sha256::digest(raw.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let token_hashes = &state.config.server.token_hashes;

    // No tokens configured → allow open access only on loopback
    if token_hashes.is_empty() {
        if state.is_loopback() {
            return next.run(req).await;
        }
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "No API tokens configured. Run 'solo token' and add the hash to server.token_hashes before exposing on a non-loopback address."
            })),
        )
            .into_response();
    }

    let raw_token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim);

    let Some(raw_token) = raw_token else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "Missing or invalid Authorization header. Use: Bearer <token>"
            })),
        )
            .into_response();
    };

    let presented = hash_token(raw_token);
    if token_hashes
        .iter()
        .any(|h| h.trim().eq_ignore_ascii_case(&presented))
    {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "Invalid or unauthorized API token"
            })),
        )
            .into_response()
    }
}
