use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;

use super::super::AppState;
use super::error_response;
use crate::core::relay::RelayError;
use crate::core::tts::AUDIO_FORMAT;

fn default_speed() -> f64 {
    1.0
}

#[derive(serde::Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default = "default_speed")]
    speed: f64,
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<TtsRequest>,
) -> Response {
    if payload.text.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No text provided");
    }

    match state
        .kokoro
        .speech(&payload.text, payload.voice.as_deref(), payload.speed)
        .await
    {
        Ok(audio) => Json(serde_json::json!({
            "success": true,
            "audio_data": STANDARD.encode(audio),
            "format": AUDIO_FORMAT,
        }))
        .into_response(),
        Err(RelayError::Timeout) => {
            error_response(StatusCode::GATEWAY_TIMEOUT, "TTS request timed out")
        }
        Err(e) => {
            warn!("TTS error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "TTS request failed")
        }
    }
}

pub async fn voices_endpoint(State(state): State<AppState>) -> Response {
    match state.kokoro.voices().await {
        Ok(voices) => Json(voices).into_response(),
        Err(e) => {
            warn!("Voices error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch voices")
        }
    }
}
