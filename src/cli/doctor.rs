use anyhow::Result;
use std::path::Path;

use crate::core::approval::{HttpPolicyGate, PolicyGate};
use crate::core::config::AppConfig;
use crate::core::llm::ollama::OllamaClient;
use crate::core::relay::ServiceStatus;
use crate::core::terminal::{
    self, print_error, print_info, print_status, print_step, print_success, print_warn,
};
use crate::core::tts::KokoroClient;
use crate::platform::{NativePlatform, Platform};

/// Report on the agent binary and every collaborator service.
/// Returns `Ok` even when checks fail; the report is the output.
pub async fn run_doctor(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path)?;

    print_step("Checking the coding agent...");
    println!();
    let mut healthy = true;
    match which::which(&config.agent.binary) {
        Ok(path) => print_success(&format!("Agent binary found: {}", path.display())),
        Err(_) => {
            healthy = false;
            print_error(&format!("Agent binary '{}' not found.", config.agent.binary));
            print_info(NativePlatform::agent_missing_hint());
        }
    }

    let default_path = &config.projects.default_path;
    if default_path.is_dir() {
        print_success(&format!("Default project: {}", default_path.display()));
    } else {
        print_warn(&format!(
            "Default project path {} does not exist.",
            default_path.display()
        ));
    }

    println!();
    print_step("Checking local services...");
    println!();
    let ollama = OllamaClient::from_config(&config.chat);
    let kokoro = KokoroClient::from_config(&config.tts);
    let policy = HttpPolicyGate::from_config(&config.policy);
    let (ollama_status, kokoro_status, policy_status) =
        tokio::join!(ollama.health(), kokoro.health(), policy.health());

    healthy &= report("Ollama", ollama.base_url(), ollama_status);
    if ollama_status == ServiceStatus::Healthy {
        print_status("Chat model", ollama.model());
    }
    healthy &= report("Kokoro", kokoro.base_url(), kokoro_status);
    let policy_target = if policy.is_enabled() {
        config.policy.url.as_deref().unwrap_or_default()
    } else {
        "not configured"
    };
    healthy &= report("Policy service", policy_target, policy_status);

    println!();
    if healthy {
        print_success(&format!("{}Everything looks good.", terminal::ROCKET));
    } else {
        print_warn(
            "Some checks failed. solo still starts, but affected features stay unavailable.",
        );
    }
    Ok(())
}

fn report(name: &str, target: &str, status: ServiceStatus) -> bool {
    match status {
        ServiceStatus::Healthy => print_success(&format!("{} is healthy ({})", name, target)),
        ServiceStatus::Disabled => print_info(&format!("{} is disabled", name)),
        ServiceStatus::Unhealthy => {
            print_warn(&format!("{} answered with an error ({})", name, target))
        }
        ServiceStatus::Unreachable => print_warn(&format!("{} is unreachable ({})", name, target)),
    }
    !status.degrades()
}
