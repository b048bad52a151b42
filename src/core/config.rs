use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::platform::{NativePlatform, Platform};

pub const CONFIG_FILE_NAME: &str = "solo.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub projects: ProjectsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SHA-256 hex digests of accepted bearer tokens.
    #[serde(default)]
    pub token_hashes: Vec<String>,
    /// PEM certificate chain. Defaults to `<data_dir>/certs/cert.pem`.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    /// PEM private key. Defaults to `<data_dir>/certs/key.pem`.
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
}

/// Certificate and key the API server terminates TLS with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub extract_commits: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectsConfig {
    #[serde(default = "default_project_path")]
    pub default_path: PathBuf,
    #[serde(default)]
    pub aliases: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Base URL of the policy service. Unset disables the gateway (always allow).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_policy_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DenyAction {
    /// Record the decision and let the agent continue on its own allow-list.
    #[default]
    Record,
    /// Kill the agent after a denial or an approval timeout.
    Terminate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    #[serde(default = "default_dangerous_patterns")]
    pub dangerous_patterns: Vec<String>,
    #[serde(default)]
    pub deny_action: DenyAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_kokoro_url")]
    pub kokoro_url: String,
    #[serde(default = "default_kokoro_voice")]
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5566
}
fn default_agent_binary() -> String {
    "claude".to_string()
}
fn default_allowed_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "MultiEdit", "Bash", "Glob", "Grep", "LS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_turns() -> u32 {
    50
}
fn default_agent_timeout() -> u64 {
    600
}
fn default_true() -> bool {
    true
}
fn default_project_path() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}
fn default_policy_timeout() -> u64 {
    5
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_agent_id() -> String {
    "solo-voice".to_string()
}
fn default_summary_interval() -> u64 {
    30
}
fn default_approval_timeout() -> u64 {
    300
}
fn default_dangerous_patterns() -> Vec<String> {
    ["rm -rf", "rm -r ", "sudo ", "chmod ", "chown ", "mkfs", "dd if="]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3.2:latest".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful, friendly voice assistant. Keep your responses concise and \
     conversational since they will be spoken aloud. Aim for 1-3 sentences unless the \
     user asks for more detail. Be warm and engaging."
        .to_string()
}
fn default_kokoro_url() -> String {
    "http://localhost:8880".to_string()
}
fn default_kokoro_voice() -> String {
    "af_heart".to_string()
}
fn default_keep_recent() -> usize {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token_hashes: Vec::new(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    /// HTTPS is on only when both files exist; otherwise the server speaks
    /// plain HTTP.
    pub fn tls_paths(&self, data_dir: &Path) -> Option<TlsPaths> {
        let certs = data_dir.join("certs");
        let cert = self
            .tls_cert
            .clone()
            .unwrap_or_else(|| certs.join("cert.pem"));
        let key = self.tls_key.clone().unwrap_or_else(|| certs.join("key.pem"));
        if cert.is_file() && key.is_file() {
            Some(TlsPaths { cert, key })
        } else {
            if cert.exists() != key.exists() {
                warn!(
                    "Only one of {} and {} exists, serving without TLS",
                    cert.display(),
                    key.display()
                );
            }
            None
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            allowed_tools: default_allowed_tools(),
            max_turns: default_max_turns(),
            timeout_secs: default_agent_timeout(),
            extract_commits: true,
        }
    }
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            default_path: default_project_path(),
            aliases: HashMap::new(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_policy_timeout(),
            environment: default_environment(),
            agent_id: default_agent_id(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            summary_interval_secs: default_summary_interval(),
            approval_timeout_secs: default_approval_timeout(),
            dangerous_patterns: default_dangerous_patterns(),
            deny_action: DenyAction::Record,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_ollama_model(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            kokoro_url: default_kokoro_url(),
            voice: default_kokoro_voice(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            persist: true,
            keep_recent: default_keep_recent(),
        }
    }
}

impl AppConfig {
    /// Load `solo.toml` from an explicit path or the data dir, then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| NativePlatform::data_dir().join(CONFIG_FILE_NAME));

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let parsed = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            info!("Loaded config from {}", path.display());
            parsed
        } else {
            if explicit.is_some() {
                warn!("Config file {} not found, using defaults", path.display());
            }
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("OLLAMA_URL") {
            self.chat.ollama_url = url;
        }
        if let Some(model) = get("OLLAMA_MODEL") {
            self.chat.model = model;
        }
        if let Some(url) = get("KOKORO_URL") {
            self.tts.kokoro_url = url;
        }
        if let Some(voice) = get("KOKORO_VOICE") {
            self.tts.voice = voice;
        }
        if let Some(url) = get("SOLO_POLICY_URL") {
            self.policy.url = Some(url);
        }
        if let Some(bin) = get("SOLO_AGENT_BIN") {
            self.agent.binary = bin;
        }
    }

    /// Resolve the working directory for a task: alias first, then an
    /// existing absolute path, then the configured default.
    pub fn resolve_project(&self, project: Option<&str>, path: Option<&str>) -> PathBuf {
        if let Some(alias) = project.map(str::trim).filter(|s| !s.is_empty()) {
            let key = alias.to_lowercase();
            if let Some(found) = self
                .projects
                .aliases
                .iter()
                .find(|(name, _)| name.to_lowercase() == key)
                .map(|(_, p)| p.clone())
            {
                return found;
            }
            warn!("Unknown project alias '{}', falling back", alias);
        }

        if let Some(raw) = path.map(str::trim).filter(|s| !s.is_empty()) {
            let candidate = PathBuf::from(raw);
            if candidate.is_absolute() && candidate.is_dir() {
                return candidate;
            }
            warn!("Ignoring unusable task path '{}'", raw);
        }

        self.projects.default_path.clone()
    }
}
