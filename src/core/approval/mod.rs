//! Approval gateway backed by an external policy service.
//!
//! The gateway is advisory: when the service is unreachable or times out the
//! task is allowed (fail-open) and the failure is logged. Only an explicit
//! `denied` answer blocks a task.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::PolicyConfig;
use crate::core::relay::{self, ServiceStatus};

pub const EVALUATE_PATH: &str = "/api/policy/evaluate";
pub const REVIEWS_PATH: &str = "/api/reviews";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ApprovalVerdict {
    Allow,
    AllowWithApproval,
    Deny { reasons: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyAction {
    pub name: String,
    pub category: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl PolicyAction {
    /// Action descriptor for delegating a coding task to the agent.
    pub fn coding_task(description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: "execute_coding_task".to_string(),
            category: "code_execution".to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContext {
    pub environment: String,
    pub agent_id: String,
    pub session_id: String,
}

#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn evaluate(&self, action: &PolicyAction, context: &PolicyContext) -> ApprovalVerdict;

    async fn health(&self) -> ServiceStatus {
        ServiceStatus::Disabled
    }
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    action: &'a PolicyAction,
    context: &'a PolicyContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    requires_human_approval: bool,
    #[serde(default)]
    violations: Vec<Violation>,
}

#[derive(Debug, Deserialize)]
struct Violation {
    #[serde(default, alias = "message")]
    reason: String,
}

#[derive(Serialize)]
struct ReviewTask<'a> {
    title: String,
    description: &'a str,
    reasons: &'a [String],
    action: &'a PolicyAction,
    context: &'a PolicyContext,
}

pub struct HttpPolicyGate {
    client: Client,
    base_url: Option<String>,
    timeout: Duration,
}

impl HttpPolicyGate {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            timeout,
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            config.url.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    async fn request_verdict(
        &self,
        base_url: &str,
        action: &PolicyAction,
        context: &PolicyContext,
    ) -> Result<EvaluateResponse> {
        let res = self
            .client
            .post(format!("{}{}", base_url, EVALUATE_PATH))
            .timeout(self.timeout)
            .json(&EvaluateRequest { action, context })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!("policy service returned {}", res.status()));
        }
        Ok(res.json::<EvaluateResponse>().await?)
    }

    async fn file_review(
        &self,
        base_url: &str,
        action: &PolicyAction,
        context: &PolicyContext,
        reasons: &[String],
    ) -> Result<()> {
        let review = ReviewTask {
            title: format!("Denied action: {}", action.name),
            description: &action.description,
            reasons,
            action,
            context,
        };
        let res = self
            .client
            .post(format!("{}{}", base_url, REVIEWS_PATH))
            .timeout(self.timeout)
            .json(&review)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!("review submission returned {}", res.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyGate for HttpPolicyGate {
    async fn evaluate(&self, action: &PolicyAction, context: &PolicyContext) -> ApprovalVerdict {
        let Some(base_url) = self.base_url.as_deref() else {
            debug!("Policy service not configured, allowing '{}'", action.name);
            return ApprovalVerdict::Allow;
        };

        let response = match self.request_verdict(base_url, action, context).await {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "Policy service unavailable ({}), failing open for session [{}]",
                    e, context.session_id
                );
                return ApprovalVerdict::Allow;
            }
        };

        if response.status.eq_ignore_ascii_case("denied") {
            let reasons: Vec<String> = response
                .violations
                .into_iter()
                .map(|v| v.reason)
                .filter(|r| !r.trim().is_empty())
                .collect();
            info!(
                "Policy denied '{}' for session [{}]: {:?}",
                action.name, context.session_id, reasons
            );
            if let Err(e) = self.file_review(base_url, action, context, &reasons).await {
                warn!("Failed to file policy review task: {}", e);
            }
            return ApprovalVerdict::Deny { reasons };
        }

        if response.requires_human_approval {
            info!(
                "Policy requires human approval for session [{}]",
                context.session_id
            );
            return ApprovalVerdict::AllowWithApproval;
        }

        ApprovalVerdict::Allow
    }

    async fn health(&self) -> ServiceStatus {
        match self.base_url.as_deref() {
            Some(base_url) => {
                relay::probe(&self.client, &relay::join_url(base_url, HEALTH_PATH)).await
            }
            None => ServiceStatus::Disabled,
        }
    }
}
