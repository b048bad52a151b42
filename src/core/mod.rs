pub mod approval;
pub mod config;
pub mod executor;
pub mod jobs;
pub mod lifecycle;
pub mod llm;
pub mod notify;
pub mod relay;
pub mod stream;
pub mod terminal;
pub mod tts;
