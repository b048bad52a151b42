//! Live streaming sessions and their approval rendezvous.
//!
//! Each pending approval parks a single-use oneshot sender in the session
//! entry. A decision takes the sender out, so a decision is consumed at most
//! once and a later waiter never sees it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} has no pending approval")]
    NotPending(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

struct PendingApproval {
    description: String,
    decision: oneshot::Sender<bool>,
}

struct SessionEntry {
    state: SessionState,
    description: String,
    started_at: DateTime<Utc>,
    pid: Option<u32>,
    agent_session_id: Option<String>,
    pending: Option<PendingApproval>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub description: String,
    pub pid: Option<u32>,
    pub pending_approval: bool,
    pub pending_description: Option<String>,
    pub agent_session_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new running session. The entry lives as long as the guard.
    pub fn register(self: &Arc<Self>, session_id: &str, description: &str) -> SessionGuard {
        self.sessions.lock().insert(
            session_id.to_string(),
            SessionEntry {
                state: SessionState::Running,
                description: description.to_string(),
                started_at: Utc::now(),
                pid: None,
                agent_session_id: None,
                pending: None,
            },
        );
        debug!("Streaming session [{}] registered", session_id);
        SessionGuard {
            table: Arc::clone(self),
            session_id: session_id.to_string(),
        }
    }

    pub fn set_pid(&self, session_id: &str, pid: Option<u32>) {
        if let Some(entry) = self.sessions.lock().get_mut(session_id) {
            entry.pid = pid;
        }
    }

    pub fn set_agent_session_id(&self, session_id: &str, agent_session_id: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(session_id)
            && entry.agent_session_id.as_deref() != Some(agent_session_id)
        {
            debug!(
                "Streaming session [{}] bound to agent session {}",
                session_id, agent_session_id
            );
            entry.agent_session_id = Some(agent_session_id.to_string());
        }
    }

    pub fn mark_completed(&self, session_id: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(session_id) {
            entry.state = SessionState::Completed;
            entry.pending = None;
        }
    }

    /// Open the decision slot. Returns the receiving half, or `None` when the
    /// session is gone.
    pub fn begin_approval(
        &self,
        session_id: &str,
        description: &str,
    ) -> Option<oneshot::Receiver<bool>> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(session_id)?;
        let (tx, rx) = oneshot::channel();
        entry.pending = Some(PendingApproval {
            description: description.to_string(),
            decision: tx,
        });
        Some(rx)
    }

    /// Deliver a decision for the pending approval, consuming the slot.
    pub fn submit_decision(&self, session_id: &str, approved: bool) -> Result<(), SessionError> {
        let pending = {
            let mut sessions = self.sessions.lock();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            entry
                .pending
                .take()
                .ok_or_else(|| SessionError::NotPending(session_id.to_string()))?
        };
        info!(
            "Streaming session [{}] {}: {}",
            session_id,
            if approved { "approved" } else { "denied" },
            pending.description
        );
        // the waiter may have timed out in between; the entry is already cleared
        if pending.decision.send(approved).is_err() {
            debug!("Decision for [{}] arrived after the waiter left", session_id);
        }
        Ok(())
    }

    /// Wait for the decision on `rx`, bounded by `timeout`. The slot is
    /// always clear when this returns.
    pub async fn await_decision(
        &self,
        session_id: &str,
        mut rx: oneshot::Receiver<bool>,
        timeout: Duration,
    ) -> ApprovalOutcome {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(true)) => ApprovalOutcome::Approved,
            Ok(Ok(false)) => ApprovalOutcome::Denied,
            Ok(Err(_)) => {
                warn!("Approval slot for [{}] closed without a decision", session_id);
                ApprovalOutcome::Denied
            }
            Err(_) => {
                self.clear_pending(session_id);
                match rx.try_recv() {
                    Ok(true) => ApprovalOutcome::Approved,
                    Ok(false) => ApprovalOutcome::Denied,
                    Err(_) => {
                        warn!(
                            "Approval for [{}] timed out after {:?}",
                            session_id, timeout
                        );
                        ApprovalOutcome::TimedOut
                    }
                }
            }
        }
    }

    fn clear_pending(&self, session_id: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(session_id) {
            entry.pending = None;
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|entry| snapshot(session_id, entry))
    }

    /// Snapshot of live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut out: Vec<SessionSnapshot> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, entry)| snapshot(id, entry))
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    fn remove(&self, session_id: &str) {
        if self.sessions.lock().remove(session_id).is_some() {
            debug!("Streaming session [{}] removed", session_id);
        }
    }
}

fn snapshot(session_id: &str, entry: &SessionEntry) -> SessionSnapshot {
    SessionSnapshot {
        session_id: session_id.to_string(),
        state: entry.state,
        description: entry.description.clone(),
        pid: entry.pid,
        pending_approval: entry.pending.is_some(),
        pending_description: entry.pending.as_ref().map(|p| p.description.clone()),
        agent_session_id: entry.agent_session_id.clone(),
        started_at: entry.started_at,
    }
}

/// Removes the session entry when the streaming task ends, however it ends.
pub struct SessionGuard {
    table: Arc<SessionTable>,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.remove(&self.session_id);
    }
}
