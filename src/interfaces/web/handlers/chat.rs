use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::super::AppState;
use super::error_response;
use crate::core::llm::{ChatChunk, ChatMessage};
use crate::core::relay::RelayError;

#[derive(serde::Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    if payload.message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No message provided");
    }

    match state.ollama.chat(&payload.history, &payload.message).await {
        Ok(response) => {
            Json(serde_json::json!({ "success": true, "response": response })).into_response()
        }
        Err(RelayError::Timeout) => {
            error_response(StatusCode::GATEWAY_TIMEOUT, "Request timed out")
        }
        Err(e) => {
            warn!("Chat error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn chat_stream_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    if payload.message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No message provided");
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<ChatChunk>(32);
    let ollama = state.ollama.clone();
    tokio::spawn(async move {
        ollama
            .chat_stream(&payload.history, &payload.message, tx)
            .await;
    });

    let stream = ReceiverStream::new(rx).map(|chunk| {
        let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(Event::default().data(data))
    });
    Sse::new(stream).into_response()
}

pub async fn models_endpoint(State(state): State<AppState>) -> Response {
    match state.ollama.models().await {
        Ok(models) => Json(models).into_response(),
        Err(e) => {
            warn!("Models error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch models")
        }
    }
}
