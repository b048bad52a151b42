use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    PendingApproval,
    Running,
    Completed,
    Timeout,
    Error,
    Rejected,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::PendingApproval => "pending_approval",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Timeout => "timeout",
            JobState::Error => "error",
            JobState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Timeout | JobState::Error | JobState::Rejected
        )
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Job {
    pub id: String,
    pub description: String,
    pub path: PathBuf,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub commits: Vec<String>,
    pub error: Option<String>,
}

/// Optional field updates applied together with a state transition.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub result: Option<String>,
    pub commits: Option<Vec<String>>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn result(result: impl Into<String>, commits: Vec<String>) -> Self {
        Self {
            result: Some(result.into()),
            commits: Some(commits),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
