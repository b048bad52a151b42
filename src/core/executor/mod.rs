//! Agent subprocess invocation.
//!
//! Both execution modes build the agent command line here:
//! - [background]: one-shot JSON run tracked in the job store
//! - the streaming executor in `core::stream` reuses [`AgentCommand`] with
//!   `OutputMode::StreamJson`

pub mod background;
pub mod commits;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::core::config::AgentConfig;

pub use background::BackgroundExecutor;
pub use commits::{CommitExtractor, HexCommitExtractor, NoCommitExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One JSON object on stdout when the run ends.
    Json,
    /// Newline-delimited JSON events while the run progresses.
    StreamJson,
}

#[derive(Debug, Clone)]
pub struct AgentCommand {
    binary: String,
    prompt: String,
    allowed_tools: Vec<String>,
    max_turns: u32,
    output: OutputMode,
    skip_permissions: bool,
    resume: Option<String>,
    workdir: PathBuf,
}

impl AgentCommand {
    /// Unattended run: tool use is pre-authorized.
    pub fn new(config: &AgentConfig, prompt: &str, workdir: &Path, output: OutputMode) -> Self {
        Self {
            binary: config.binary.clone(),
            prompt: prompt.to_string(),
            allowed_tools: config.allowed_tools.clone(),
            max_turns: config.max_turns,
            output,
            skip_permissions: true,
            resume: None,
            workdir: workdir.to_path_buf(),
        }
    }

    /// Leave tool use un-authorized so the agent surfaces permission requests.
    pub fn supervised(mut self) -> Self {
        self.skip_permissions = false;
        self
    }

    pub fn resume(mut self, agent_session_id: Option<String>) -> Self {
        self.resume = agent_session_id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn is_supervised(&self) -> bool {
        !self.skip_permissions
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.prompt.clone(),
            "--allowedTools".to_string(),
            self.allowed_tools.join(","),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
            "--output-format".to_string(),
        ];
        match self.output {
            OutputMode::Json => args.push("json".to_string()),
            OutputMode::StreamJson => {
                args.push("stream-json".to_string());
                args.push("--verbose".to_string());
            }
        }
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(ref id) = self.resume {
            args.push("--resume".to_string());
            args.push(id.clone());
        }
        args
    }

    /// Spawnable command with piped stdout/stderr, null stdin and a
    /// non-interactive terminal environment.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args())
            .current_dir(&self.workdir)
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .env("CI", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
