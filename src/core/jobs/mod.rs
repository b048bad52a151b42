//! In-memory job store for background agent runs.
//!
//! Jobs live for the lifetime of the process. Every mutation happens under
//! the store's lock and readers only ever get clones.

pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

pub use types::{Job, JobState, JobUpdate};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobApprovalError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {id} is {} and not awaiting approval", state.as_str())]
    NotPending { id: String, state: JobState },
}

pub fn can_transition(from: JobState, to: JobState) -> bool {
    if from == to {
        return true;
    }
    match from {
        JobState::Queued => matches!(to, JobState::PendingApproval | JobState::Running),
        JobState::PendingApproval => matches!(to, JobState::Running | JobState::Rejected),
        JobState::Running => matches!(
            to,
            JobState::Completed | JobState::Timeout | JobState::Error
        ),
        JobState::Completed | JobState::Timeout | JobState::Error | JobState::Rejected => false,
    }
}

#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job in `queued`. An existing id is left untouched and
    /// its current record returned.
    pub fn create(&self, id: &str, description: &str, path: PathBuf) -> Job {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(id) {
            warn!("Job [{}] already exists, keeping existing record", id);
            return existing.clone();
        }
        let job = Job {
            id: id.to_string(),
            description: description.to_string(),
            path,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            approved_at: None,
            completed_at: None,
            result: None,
            commits: Vec::new(),
            error: None,
        };
        jobs.insert(id.to_string(), job.clone());
        job
    }

    /// Move a job forward and apply `update`. Returns false (and logs) when
    /// the job is unknown or the edge is not allowed. A transition to the
    /// current state changes nothing and also returns false.
    pub fn transition(&self, id: &str, to: JobState, update: JobUpdate) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(id) else {
            warn!("Ignoring transition to {} for unknown job [{}]", to.as_str(), id);
            return false;
        };
        apply_transition(job, to, update)
    }

    /// Like [`transition`](Self::transition) but only when the job is
    /// currently in `from`. Used to claim a job exactly once.
    pub fn transition_from(
        &self,
        id: &str,
        from: JobState,
        to: JobState,
        update: JobUpdate,
    ) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(id) {
            Some(job) if job.state == from => apply_transition(job, to, update),
            Some(job) => {
                debug!(
                    "Job [{}] is {}, expected {}",
                    id,
                    job.state.as_str(),
                    from.as_str()
                );
                false
            }
            None => {
                warn!("Ignoring transition to {} for unknown job [{}]", to.as_str(), id);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    /// Snapshot of every job, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}

fn apply_transition(job: &mut Job, to: JobState, update: JobUpdate) -> bool {
    let from = job.state;
    if from == to {
        debug!("Job [{}] is already {}, leaving it untouched", job.id, to.as_str());
        return false;
    }
    if !can_transition(from, to) {
        warn!(
            "Invalid job state transition for [{}]: {} -> {}",
            job.id,
            from.as_str(),
            to.as_str()
        );
        return false;
    }

    let now = Utc::now();
    if from == JobState::PendingApproval && to == JobState::Running {
        job.approved_at = Some(now);
    }
    if to == JobState::Running && job.started_at.is_none() {
        job.started_at = Some(now);
    }
    if to.is_terminal() && job.completed_at.is_none() {
        job.completed_at = Some(now);
    }

    job.state = to;
    if let Some(result) = update.result {
        job.result = Some(result);
    }
    if let Some(commits) = update.commits {
        job.commits = commits;
    }
    if let Some(error) = update.error {
        job.error = Some(error);
    }
    debug!("Job [{}] {} -> {}", job.id, from.as_str(), to.as_str());
    true
}
