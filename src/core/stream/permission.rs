//! Mid-stream approval detection.
//!
//! The dangerous-command list comes from `[streaming].dangerous_patterns` and
//! is a replaceable policy, not a security boundary.

use super::protocol::AgentEvent;

#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    dangerous_patterns: Vec<String>,
    /// Tool use is pre-authorized for the whole session.
    pre_authorized: bool,
}

impl ApprovalPolicy {
    pub fn new(dangerous_patterns: Vec<String>, pre_authorized: bool) -> Self {
        Self {
            dangerous_patterns: dangerous_patterns
                .into_iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_lowercase())
                .collect(),
            pre_authorized,
        }
    }

    /// First configured pattern found in `command`.
    pub fn dangerous_match(&self, command: &str) -> Option<&str> {
        let lowered = command.to_lowercase();
        self.dangerous_patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }
}

/// Description of the approval being asked for, or `None` when the event
/// needs no approval.
pub fn permission_request(event: &AgentEvent, policy: &ApprovalPolicy) -> Option<String> {
    match event {
        AgentEvent::System {
            subtype, message, ..
        } => {
            let sub = subtype.to_lowercase();
            let asks = sub.contains("permission")
                || sub.contains("approval")
                || sub == "input_request"
                || sub == "user_input_required";
            if !asks {
                return None;
            }
            Some(
                message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| format!("The agent is asking for {}", subtype)),
            )
        }
        AgentEvent::Assistant { .. } if !policy.pre_authorized => {
            event.tool_uses().find_map(|(name, input)| {
                if name != "Bash" {
                    return None;
                }
                let command = input.get("command").and_then(|c| c.as_str())?;
                let pattern = policy.dangerous_match(command)?;
                Some(format!(
                    "Run `{}` (matches '{}')",
                    command.trim(),
                    pattern.trim()
                ))
            })
        }
        _ => None,
    }
}

pub fn is_permission_request(event: &AgentEvent, policy: &ApprovalPolicy) -> bool {
    permission_request(event, policy).is_some()
}
