//! One-shot agent runs tracked in the [`JobStore`].
//!
//! State per job: `queued -> [pending_approval ->] running -> completed | timeout | error`.
//! A pending job can also be refused (`rejected`) without ever running.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{AgentCommand, CommitExtractor, HexCommitExtractor, NoCommitExtractor, OutputMode};
use crate::core::config::AgentConfig;
use crate::core::jobs::{Job, JobApprovalError, JobState, JobStore, JobUpdate};
use crate::core::notify::{Notification, NotificationKind, NotificationSink};

pub const TIMEOUT_ERROR: &str = "Task exceeded the execution time limit";
pub const REJECTED_ERROR: &str = "Task was rejected during approval";

/// Text and failure flag pulled out of the agent's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub text: String,
    pub is_error: bool,
}

/// A JSON object yields its `result` string and `is_error` flag, other JSON
/// is stringified, and anything that is not JSON is returned verbatim.
pub fn parse_agent_output(stdout: &str) -> AgentOutput {
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(Value::Object(map)) => {
            let is_error = map
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let text = match map.get("result") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => Value::Object(map.clone()).to_string(),
            };
            AgentOutput { text, is_error }
        }
        Ok(Value::String(s)) => AgentOutput {
            text: s,
            is_error: false,
        },
        Ok(other) => AgentOutput {
            text: other.to_string(),
            is_error: false,
        },
        Err(_) => AgentOutput {
            text: stdout.to_string(),
            is_error: false,
        },
    }
}

pub struct BackgroundExecutor {
    config: AgentConfig,
    jobs: Arc<JobStore>,
    notifier: Arc<dyn NotificationSink>,
    commits: Arc<dyn CommitExtractor>,
    timeout: Duration,
}

impl BackgroundExecutor {
    pub fn new(
        config: AgentConfig,
        jobs: Arc<JobStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let commits: Arc<dyn CommitExtractor> = if config.extract_commits {
            Arc::new(HexCommitExtractor::new())
        } else {
            Arc::new(NoCommitExtractor)
        };
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self {
            config,
            jobs,
            notifier,
            commits,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Claim a queued job and run it on its own task.
    pub fn dispatch(self: &Arc<Self>, job_id: &str) -> Option<JoinHandle<JobState>> {
        if !self.jobs.transition_from(
            job_id,
            JobState::Queued,
            JobState::Running,
            JobUpdate::default(),
        ) {
            return None;
        }
        Some(self.spawn_claimed(job_id))
    }

    /// Park a queued job until someone approves or rejects it.
    pub async fn hold_for_approval(&self, job_id: &str) -> bool {
        if !self.jobs.transition_from(
            job_id,
            JobState::Queued,
            JobState::PendingApproval,
            JobUpdate::default(),
        ) {
            return false;
        }
        if let Some(job) = self.jobs.get(job_id) {
            info!("Job [{}] is waiting for approval", job_id);
            self.notifier
                .notify(Notification::outcome(
                    NotificationKind::Milestone,
                    job_id,
                    "Approval needed",
                    &job.description,
                    "",
                ))
                .await;
        }
        true
    }

    /// Resolve a pending job. Approval starts the run, rejection ends the
    /// job in `rejected`.
    pub async fn decide(
        self: &Arc<Self>,
        job_id: &str,
        approved: bool,
    ) -> Result<JobState, JobApprovalError> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| JobApprovalError::NotFound(job_id.to_string()))?;

        let target = if approved {
            JobState::Running
        } else {
            JobState::Rejected
        };
        let update = if approved {
            JobUpdate::default()
        } else {
            JobUpdate::error(REJECTED_ERROR)
        };
        if !self
            .jobs
            .transition_from(job_id, JobState::PendingApproval, target, update)
        {
            let state = self.jobs.get(job_id).map(|j| j.state).unwrap_or(job.state);
            return Err(JobApprovalError::NotPending {
                id: job_id.to_string(),
                state,
            });
        }

        if approved {
            info!("Job [{}] approved", job_id);
            self.spawn_claimed(job_id);
        } else {
            info!("Job [{}] rejected", job_id);
            self.notifier
                .notify(Notification::outcome(
                    NotificationKind::Error,
                    job_id,
                    "Task rejected",
                    &job.description,
                    REJECTED_ERROR,
                ))
                .await;
        }
        Ok(target)
    }

    /// Claim a queued job and run it on the current task, returning the
    /// terminal state.
    pub async fn run_now(&self, job_id: &str) -> Option<JobState> {
        if !self.jobs.transition_from(
            job_id,
            JobState::Queued,
            JobState::Running,
            JobUpdate::default(),
        ) {
            return None;
        }
        let job = self.jobs.get(job_id)?;
        Some(self.execute(job).await)
    }

    fn spawn_claimed(self: &Arc<Self>, job_id: &str) -> JoinHandle<JobState> {
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            match this.jobs.get(&job_id) {
                Some(job) => this.execute(job).await,
                None => {
                    warn!("Job [{}] vanished before it could run", job_id);
                    JobState::Error
                }
            }
        })
    }

    async fn execute(&self, job: Job) -> JobState {
        let command =
            AgentCommand::new(&self.config, &job.description, &job.path, OutputMode::Json);
        info!(
            "Job [{}] running '{}' in {}",
            job.id,
            command.binary(),
            job.path.display()
        );

        let child = match command.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("Failed to start agent '{}': {}", command.binary(), e);
                error!("Job [{}] {}", job.id, msg);
                return self.finish_error(&job, msg).await;
            }
        };

        // on timeout the future is dropped and kill_on_drop reaps the child
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!("Job [{}] timed out after {:?}", job.id, self.timeout);
                self.jobs
                    .transition(&job.id, JobState::Timeout, JobUpdate::error(TIMEOUT_ERROR));
                self.notifier
                    .notify(Notification::outcome(
                        NotificationKind::Error,
                        &job.id,
                        "Task timed out",
                        &job.description,
                        TIMEOUT_ERROR,
                    ))
                    .await;
                JobState::Timeout
            }
            Ok(Err(e)) => {
                let msg = format!("Agent process failed: {}", e);
                error!("Job [{}] {}", job.id, msg);
                self.finish_error(&job, msg).await
            }
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

                if !output.status.success() {
                    let detail = if !stderr.is_empty() {
                        stderr
                    } else {
                        stdout.trim().to_string()
                    };
                    let msg = match output.status.code() {
                        Some(code) => format!("Agent exited with code {}: {}", code, detail),
                        None => format!("Agent terminated by signal: {}", detail),
                    };
                    warn!("Job [{}] {}", job.id, msg);
                    return self.finish_error(&job, msg).await;
                }

                let parsed = parse_agent_output(&stdout);
                if parsed.is_error {
                    warn!("Job [{}] agent reported an error", job.id);
                    return self.finish_error(&job, parsed.text).await;
                }

                let commits = self.commits.extract(&stdout);
                self.jobs.transition(
                    &job.id,
                    JobState::Completed,
                    JobUpdate::result(parsed.text.clone(), commits),
                );
                info!("Job [{}] completed", job.id);
                self.notifier
                    .notify(Notification::outcome(
                        NotificationKind::Success,
                        &job.id,
                        "Task completed",
                        &job.description,
                        &parsed.text,
                    ))
                    .await;
                JobState::Completed
            }
        }
    }

    async fn finish_error(&self, job: &Job, message: String) -> JobState {
        self.jobs
            .transition(&job.id, JobState::Error, JobUpdate::error(message.clone()));
        self.notifier
            .notify(Notification::outcome(
                NotificationKind::Error,
                &job.id,
                "Task failed",
                &job.description,
                &message,
            ))
            .await;
        JobState::Error
    }
}
