//! Shared plumbing for the thin HTTP relays to local services.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request timed out")]
    Timeout,
    #[error("{service} request failed with status {status}")]
    Status { service: &'static str, status: u16 },
    #[error("{0}")]
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Timeout
        } else {
            RelayError::Transport(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Unreachable,
    Disabled,
}

impl ServiceStatus {
    /// Whether this status pulls the overall health down.
    pub fn degrades(self) -> bool {
        matches!(self, ServiceStatus::Unhealthy | ServiceStatus::Unreachable)
    }
}

/// GET `url` and classify the answer.
pub async fn probe(client: &Client, url: &str) -> ServiceStatus {
    match client.get(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(res) if res.status().is_success() => ServiceStatus::Healthy,
        Ok(_) => ServiceStatus::Unhealthy,
        Err(_) => ServiceStatus::Unreachable,
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
