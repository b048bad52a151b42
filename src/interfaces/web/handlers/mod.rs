pub mod chat;
pub mod health;
pub mod notifications;
pub mod stream;
pub mod tasks;
pub mod tts;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// `{success: false, error}` with the given status.
pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}
