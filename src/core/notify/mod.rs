//! Terminal-state and milestone notifications.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::core::config::NotificationConfig;
use crate::platform::{NativePlatform, Platform};

pub const NOTIFICATIONS_FILE_NAME: &str = "notifications.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
    Milestone,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Job id or streaming session id the notification belongs to.
    pub task_id: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        task_id: &str,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            task_id: task_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Notification for a finished task: `<description>: <snippet>`.
    pub fn outcome(
        kind: NotificationKind,
        task_id: &str,
        title: &str,
        description: &str,
        detail: &str,
    ) -> Self {
        let description = truncate_chars(description, 50);
        let message = if detail.trim().is_empty() {
            description
        } else {
            format!("{}: {}", description, truncate_chars(detail.trim(), 100))
        };
        Self::new(kind, task_id, title, message)
    }
}

/// Cut `text` to at most `max` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification);

    /// Most recent notifications, newest first.
    fn recent(&self, limit: usize) -> Vec<Notification>;
}

struct RecentBuffer {
    items: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl RecentBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, notification: Notification) {
        let mut items = self.items.lock();
        items.push_front(notification);
        while items.len() > self.capacity {
            items.pop_back();
        }
    }

    fn recent(&self, limit: usize) -> Vec<Notification> {
        self.items.lock().iter().take(limit).cloned().collect()
    }
}

/// Keeps notifications in memory only.
pub struct InMemoryNotificationSink {
    buffer: RecentBuffer,
}

impl InMemoryNotificationSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RecentBuffer::new(capacity),
        }
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(&self, notification: Notification) {
        info!(
            "Notification [{:?}] {}: {}",
            notification.kind, notification.title, notification.message
        );
        self.buffer.push(notification);
    }

    fn recent(&self, limit: usize) -> Vec<Notification> {
        self.buffer.recent(limit)
    }
}

/// Appends every notification as one JSON line and keeps a recent window
/// in memory for the API.
pub struct JsonlNotificationSink {
    path: PathBuf,
    buffer: RecentBuffer,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlNotificationSink {
    pub fn new(path: PathBuf, capacity: usize) -> Self {
        Self {
            path,
            buffer: RecentBuffer::new(capacity),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn in_data_dir(capacity: usize) -> Self {
        Self::new(
            NativePlatform::data_dir().join(NOTIFICATIONS_FILE_NAME),
            capacity,
        )
    }

    async fn append(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existed = self.path.exists();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        if !existed {
            NativePlatform::restrict_file_permissions(&self.path);
        }
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for JsonlNotificationSink {
    async fn notify(&self, notification: Notification) {
        info!(
            "Notification [{:?}] {}: {}",
            notification.kind, notification.title, notification.message
        );
        if let Err(e) = self.append(&notification).await {
            warn!(
                "Failed to persist notification to {}: {}",
                self.path.display(),
                e
            );
        }
        self.buffer.push(notification);
    }

    fn recent(&self, limit: usize) -> Vec<Notification> {
        self.buffer.recent(limit)
    }
}

/// The sink selected by `[notifications]`.
pub fn sink_from_config(config: &NotificationConfig) -> Arc<dyn NotificationSink> {
    if config.persist {
        Arc::new(JsonlNotificationSink::in_data_dir(config.keep_recent))
    } else {
        Arc::new(InMemoryNotificationSink::new(config.keep_recent))
    }
}
