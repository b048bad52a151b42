//! Relay to a Kokoro text-to-speech server (OpenAI-compatible audio API).

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::TtsConfig;
use crate::core::relay::{self, RelayError, ServiceStatus};

const SPEECH_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const AUDIO_FORMAT: &str = "mp3";

#[derive(Serialize)]
struct SpeechRequest<'a> {
    input: &'a str,
    voice: &'a str,
    model: &'a str,
    response_format: &'a str,
    speed: f64,
}

pub struct KokoroClient {
    client: Client,
    base_url: String,
    default_voice: String,
}

impl KokoroClient {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.kokoro_url.clone(),
            default_voice: config.voice.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    /// Synthesize `text` and return the encoded audio bytes.
    pub async fn speech(
        &self,
        text: &str,
        voice: Option<&str>,
        speed: f64,
    ) -> Result<Vec<u8>, RelayError> {
        let voice = voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&self.default_voice);
        let res = self
            .client
            .post(relay::join_url(&self.base_url, "/v1/audio/speech"))
            .timeout(SPEECH_TIMEOUT)
            .json(&SpeechRequest {
                input: text,
                voice,
                model: "kokoro",
                response_format: AUDIO_FORMAT,
                speed,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status {
                service: "Kokoro",
                status: res.status().as_u16(),
            });
        }
        Ok(res.bytes().await?.to_vec())
    }

    pub async fn voices(&self) -> Result<Value, RelayError> {
        let res = self
            .client
            .get(relay::join_url(&self.base_url, "/v1/audio/voices"))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status {
                service: "Kokoro",
                status: res.status().as_u16(),
            });
        }
        Ok(res.json().await?)
    }

    pub async fn health(&self) -> ServiceStatus {
        relay::probe(&self.client, &relay::join_url(&self.base_url, "/health")).await
    }
}
