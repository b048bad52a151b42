use anyhow::{Result, bail};
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::RunFlags;
use crate::core::approval::{
    ApprovalVerdict, HttpPolicyGate, PolicyAction, PolicyContext, PolicyGate,
};
use crate::core::config::AppConfig;
use crate::core::executor::BackgroundExecutor;
use crate::core::jobs::{JobState, JobStore};
use crate::core::notify;
use crate::core::stream::{Frame, LineType, SessionTable, StreamRequest, StreamingExecutor};
use crate::core::terminal::{
    GuideSection, print_error, print_info, print_status, print_step, print_success, print_warn,
};
use crate::logging;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Run one task in-process and print its outcome.
pub async fn run_task(flags: RunFlags) -> Result<()> {
    let _log_tx = logging::init(flags.verbose, !flags.verbose);
    let config = AppConfig::load(flags.config.as_deref())?;
    let path = config.resolve_project(flags.project.as_deref(), flags.path.as_deref());
    let description = flags.prompt.trim().to_string();
    let task_id = uuid::Uuid::new_v4().to_string();

    let gate = HttpPolicyGate::from_config(&config.policy);
    let action = PolicyAction::coding_task(
        &description,
        serde_json::json!({
            "path": path.display().to_string(),
            "mode": if flags.stream { "streaming" } else { "background" },
        }),
    );
    let context = PolicyContext {
        environment: config.policy.environment.clone(),
        agent_id: config.policy.agent_id.clone(),
        session_id: task_id.clone(),
    };
    let verdict = gate.evaluate(&action, &context).await;
    if let ApprovalVerdict::Deny { reasons } = &verdict {
        print_error("Task denied by policy.");
        for reason in reasons {
            print_status("Reason", reason);
        }
        bail!("task denied by policy");
    }

    print_step(&format!("Running in {}", path.display()));
    let needs_approval = verdict == ApprovalVerdict::AllowWithApproval;
    if flags.stream {
        run_streaming(config, task_id, description, path, needs_approval).await
    } else {
        run_background(config, task_id, description, path, needs_approval).await
    }
}

async fn run_background(
    config: AppConfig,
    task_id: String,
    description: String,
    path: std::path::PathBuf,
    needs_approval: bool,
) -> Result<()> {
    let notifier = notify::sink_from_config(&config.notifications);
    let jobs = Arc::new(JobStore::new());
    let executor = Arc::new(BackgroundExecutor::new(
        config.agent.clone(),
        jobs.clone(),
        notifier,
    ));
    jobs.create(&task_id, &description, path);

    if needs_approval {
        executor.hold_for_approval(&task_id).await;
        let approved = confirm(&format!(
            "Policy requires approval for \"{}\". Run it?",
            description
        ))
        .await;
        executor.decide(&task_id, approved).await?;
        if approved {
            while jobs
                .get(&task_id)
                .is_some_and(|job| !job.state.is_terminal())
            {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    } else {
        executor.run_now(&task_id).await;
    }

    let Some(job) = jobs.get(&task_id) else {
        bail!("job {} vanished", task_id);
    };
    let mut section = GuideSection::new("Task").status("State", job.state.as_str());
    if let Some(result) = &job.result {
        section = section.status("Result", result);
    }
    if !job.commits.is_empty() {
        section = section.status("Commits", &job.commits.join(", "));
    }
    if let Some(error) = &job.error {
        section = section.status("Error", error);
    }
    section.print();
    println!();

    match job.state {
        JobState::Completed => {
            print_success("Task completed.");
            Ok(())
        }
        other => bail!("task ended in state {}", other.as_str()),
    }
}

async fn run_streaming(
    config: AppConfig,
    task_id: String,
    description: String,
    path: std::path::PathBuf,
    supervised: bool,
) -> Result<()> {
    let notifier = notify::sink_from_config(&config.notifications);
    let executor = Arc::new(StreamingExecutor::new(
        config.agent.clone(),
        &config.streaming,
        Arc::new(SessionTable::new()),
        notifier,
    ));
    let (session_id, mut rx) = executor.start_with_id(
        task_id,
        StreamRequest {
            description,
            path,
            supervised,
            resume_session_id: None,
        },
    );

    let mut succeeded = false;
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::SessionStart { supervised, .. } => {
                print_status("Session", &session_id);
                if supervised {
                    print_info("Supervised run: risky tool use will ask for approval.");
                }
            }
            Frame::Output { content, line_type } => print_output(&content, line_type),
            Frame::ApprovalNeeded { description, .. } => {
                let approved = confirm(&format!("Approve: {}?", description)).await;
                if let Err(e) = executor.sessions().submit_decision(&session_id, approved) {
                    print_warn(&e.to_string());
                }
            }
            Frame::ApprovalTimeout { message, .. } => print_warn(&message),
            Frame::Summary { content, .. } => print_info(&content),
            Frame::Error { message } => print_error(&message),
            Frame::Raw { content } => println!("{}", content),
            Frame::Complete {
                success,
                summary,
                agent_session_id,
                ..
            } => {
                succeeded = success;
                if success {
                    print_success(&summary);
                } else {
                    print_error(&summary);
                }
                if let Some(id) = agent_session_id {
                    print_status("Resume with agent session", &id);
                }
            }
        }
    }

    if succeeded {
        Ok(())
    } else {
        bail!("streaming task did not complete successfully")
    }
}

fn print_output(content: &str, line_type: LineType) {
    let styled = match line_type {
        LineType::Assistant => style(content).cyan(),
        LineType::Tool | LineType::ToolResult => style(content).yellow(),
        LineType::Thinking => style(content).dim(),
        LineType::Success => style(content).green(),
        LineType::Error => style(content).red(),
        LineType::System => style(content).magenta(),
    };
    println!("  {}", styled);
}

/// Ask a yes/no question on stdin. End of input counts as no.
async fn confirm(question: &str) -> bool {
    println!("{} {} ", style("?").bold().yellow(), style(question).bold());
    println!("  [y/N]");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(Some(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}
