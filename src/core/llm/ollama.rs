//! Relay to a local Ollama server.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::ChatMessage;
use crate::core::config::ChatConfig;
use crate::core::relay::{self, RelayError, ServiceStatus};

const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const STREAM_TIMEOUT: Duration = Duration::from_secs(120);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// One SSE payload of a relayed streaming chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatChunk {
    Content { content: String },
    Done { done: bool, full_response: String },
    Error { error: String },
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl OllamaClient {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.ollama_url.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// System prompt, then prior turns, then the new user message.
    pub fn build_messages(&self, history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));
        messages
    }

    pub async fn chat(&self, history: &[ChatMessage], message: &str) -> Result<String, RelayError> {
        let messages = self.build_messages(history, message);
        let res = self
            .client
            .post(relay::join_url(&self.base_url, "/api/chat"))
            .timeout(CHAT_TIMEOUT)
            .json(&ChatRequest {
                model: &self.model,
                messages: &messages,
                stream: false,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status {
                service: "Ollama",
                status: res.status().as_u16(),
            });
        }
        let parsed: ChatResponse = res.json().await?;
        Ok(parsed.message.unwrap_or_default().content)
    }

    /// Relay a streaming chat into `tx`: one `Content` per non-empty chunk,
    /// then `Done` with the accumulated text, or a single `Error`.
    /// Undecodable lines are skipped.
    pub async fn chat_stream(
        &self,
        history: &[ChatMessage],
        message: &str,
        tx: mpsc::Sender<ChatChunk>,
    ) {
        if let Err(e) = self.stream_into(history, message, &tx).await {
            warn!("Ollama stream failed: {}", e);
            let _ = tx
                .send(ChatChunk::Error {
                    error: e.to_string(),
                })
                .await;
        }
    }

    async fn stream_into(
        &self,
        history: &[ChatMessage],
        message: &str,
        tx: &mpsc::Sender<ChatChunk>,
    ) -> Result<(), RelayError> {
        let messages = self.build_messages(history, message);
        let res = self
            .client
            .post(relay::join_url(&self.base_url, "/api/chat"))
            .timeout(STREAM_TIMEOUT)
            .json(&ChatRequest {
                model: &self.model,
                messages: &messages,
                stream: true,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status {
                service: "Ollama",
                status: res.status().as_u16(),
            });
        }

        let body = Box::pin(res.bytes_stream().map(|r| r.map_err(std::io::Error::other)));
        let mut lines = StreamReader::new(body).lines();
        let mut full_response = String::new();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    if tx
                        .send(ChatChunk::Error {
                            error: e.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        debug!("Chat stream client went away");
                    }
                    return Ok(());
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<ChatResponse>(&line) else {
                debug!("Skipping undecodable Ollama line");
                continue;
            };
            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if !content.is_empty() {
                full_response.push_str(&content);
                if tx.send(ChatChunk::Content { content }).await.is_err() {
                    return Ok(());
                }
            }
            if chunk.done {
                let _ = tx
                    .send(ChatChunk::Done {
                        done: true,
                        full_response: full_response.clone(),
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Raw `/api/tags` listing.
    pub async fn models(&self) -> Result<Value, RelayError> {
        let res = self
            .client
            .get(relay::join_url(&self.base_url, "/api/tags"))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status {
                service: "Ollama",
                status: res.status().as_u16(),
            });
        }
        Ok(res.json().await?)
    }

    pub async fn health(&self) -> ServiceStatus {
        relay::probe(&self.client, &relay::join_url(&self.base_url, "/api/tags")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get, routing::post};
    use serde_json::json;

    async fn chat_handler(Json(body): Json<Value>) -> axum::response::Response {
        use axum::response::IntoResponse;
        let last = body["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string();
        let first_role = body["messages"][0]["role"].as_str().unwrap_or_default().to_string();
        if body["stream"] == json!(true) {
            let lines = [
                json!({ "message": { "content": "Hel" }, "done": false }).to_string(),
                "not json".to_string(),
                json!({ "message": { "content": "lo" }, "done": false }).to_string(),
                json!({ "message": { "content": "" }, "done": true }).to_string(),
            ]
            .join("\n");
            lines.into_response()
        } else {
            Json(json!({ "message": { "content": format!("{}:{}", first_role, last) } }))
                .into_response()
        }
    }

    async fn spawn_ollama() -> String {
        let app = Router::new()
            .route("/api/chat", post(chat_handler))
            .route(
                "/api/tags",
                get(|| async { Json(json!({ "models": [{ "name": "llama3.2:latest" }] })) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn client(url: String) -> OllamaClient {
        OllamaClient::from_config(&ChatConfig {
            ollama_url: url,
            ..ChatConfig::default()
        })
    }

    #[test]
    fn system_prompt_leads_the_conversation() {
        let c = client("http://localhost:11434".into());
        let history = vec![ChatMessage {
            role: "assistant".into(),
            content: "Hi!".into(),
        }];
        let messages = c.build_messages(&history, "What time is it?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "Hi!");
        assert_eq!(messages[2], ChatMessage::user("What time is it?"));
    }

    #[tokio::test]
    async fn chat_returns_assistant_content() {
        let c = client(spawn_ollama().await);
        assert_eq!(c.chat(&[], "ping").await.unwrap(), "system:ping");
    }

    #[tokio::test]
    async fn stream_relays_chunks_then_done() {
        let c = client(spawn_ollama().await);
        let (tx, mut rx) = mpsc::channel(16);
        c.chat_stream(&[], "hello", tx).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![
                ChatChunk::Content {
                    content: "Hel".into()
                },
                ChatChunk::Content {
                    content: "lo".into()
                },
                ChatChunk::Done {
                    done: true,
                    full_response: "Hello".into()
                },
            ]
        );
        assert_eq!(
            serde_json::to_value(&chunks[2]).unwrap(),
            json!({ "done": true, "full_response": "Hello" })
        );
    }

    #[tokio::test]
    async fn unreachable_server_yields_error_chunk_and_unreachable_health() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let c = client(format!("http://127.0.0.1:{}", port));

        let (tx, mut rx) = mpsc::channel(4);
        c.chat_stream(&[], "hello", tx).await;
        assert!(matches!(rx.recv().await, Some(ChatChunk::Error { .. })));
        assert_eq!(c.health().await, ServiceStatus::Unreachable);
    }

    #[tokio::test]
    async fn models_and_health_use_tags() {
        let c = client(spawn_ollama().await);
        let models = c.models().await.unwrap();
        assert_eq!(models["models"][0]["name"], "llama3.2:latest");
        assert_eq!(c.health().await, ServiceStatus::Healthy);
    }
}
