//! Natural-language progress and completion summaries.
//!
//! Both summaries are pure functions of an event list. Sets are ordered so
//! identical input always renders identical text.

use std::collections::BTreeSet;

use serde::Serialize;

use super::protocol::{AgentEvent, file_name};

pub const EMPTY_PROGRESS: &str = "I'm still working on the task.";
pub const EMPTY_COMPLETION: &str = "I completed the task.";
pub const EMPTY_FAILURE: &str = "I couldn't finish the task.";

const MAX_LISTED_FILES: usize = 3;
const MAX_RESULT_SNIPPET: usize = 160;

const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
const READ_TOOLS: &[&str] = &["Read"];
const PACKAGE_MANAGERS: &[&str] = &[
    "npm", "npx", "yarn", "pnpm", "bun", "pip", "pip3", "uv", "poetry", "cargo", "gem",
    "bundle", "composer", "go",
];
const SCRIPT_RUNNERS: &[&str] = &[
    "python", "python3", "node", "deno", "ruby", "bash", "sh", "make", "just", "perl", "php",
];
const CODE_MARKERS: &[&str] = &[
    "{", "}", ";", "=>", "```", "fn ", "def ", "function ", "class ", "import ", "return ",
];

#[derive(Debug, Default)]
struct Facts {
    tools_used: BTreeSet<String>,
    files_modified: BTreeSet<String>,
    files_read: BTreeSet<String>,
    commands: Vec<String>,
    errors: usize,
}

impl Facts {
    fn collect(events: &[AgentEvent]) -> Self {
        let mut facts = Facts::default();
        for event in events {
            if let AgentEvent::System { is_error: true, .. } = event {
                facts.errors += 1;
            }
            for (name, input) in event.tool_uses() {
                facts.tools_used.insert(name.to_string());
                let path = ["file_path", "path", "notebook_path"]
                    .iter()
                    .find_map(|k| input.get(*k).and_then(|v| v.as_str()));
                if WRITE_TOOLS.contains(&name) {
                    if let Some(p) = path {
                        facts.files_modified.insert(file_name(p));
                    }
                } else if READ_TOOLS.contains(&name) {
                    if let Some(p) = path {
                        facts.files_read.insert(file_name(p));
                    }
                } else if name == "Bash" {
                    let cmd = input
                        .get("command")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    facts.commands.push(cmd.to_string());
                }
            }
        }
        facts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSummary {
    pub tools_used: BTreeSet<String>,
    pub files_modified: BTreeSet<String>,
    pub files_read: BTreeSet<String>,
    pub commands_run: usize,
    pub errors: usize,
    pub events: usize,
    pub text: String,
}

impl ProgressSummary {
    pub fn from_events(events: &[AgentEvent]) -> Self {
        let facts = Facts::collect(events);
        let mut clauses = Vec::new();
        if let Some(c) = files_clause("edited", &facts.files_modified) {
            clauses.push(c);
        }
        if let Some(c) = files_clause("read", &facts.files_read) {
            clauses.push(c);
        }
        if !facts.commands.is_empty() {
            clauses.push(format!("run {}", count_noun(facts.commands.len(), "command")));
        }
        if facts.errors > 0 {
            clauses.push(format!("hit {}", count_noun(facts.errors, "error")));
        }

        let text = if clauses.is_empty() {
            EMPTY_PROGRESS.to_string()
        } else {
            format!("So far I've {}.", join_clauses(&clauses))
        };

        Self {
            tools_used: facts.tools_used,
            files_modified: facts.files_modified,
            files_read: facts.files_read,
            commands_run: facts.commands.len(),
            errors: facts.errors,
            events: events.len(),
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CompletionSummary {
    pub tools_used: BTreeSet<String>,
    pub files_modified: BTreeSet<String>,
    pub files_read: BTreeSet<String>,
    pub commands_run: usize,
    pub errors: usize,
    pub events: usize,
    pub used_version_control: bool,
    pub used_package_manager: bool,
    pub ran_scripts: bool,
    pub succeeded: bool,
    pub final_result: Option<String>,
    pub text: String,
}

impl CompletionSummary {
    /// `exited_ok` is whether the run as a whole ended cleanly. An error
    /// result as the last reported outcome also counts as a failure.
    pub fn from_events(events: &[AgentEvent], exited_ok: bool) -> Self {
        let facts = Facts::collect(events);
        let last_result_failed = events.iter().rev().find_map(|e| match e {
            AgentEvent::Result { success, .. } => Some(!success),
            _ => None,
        });
        let succeeded = exited_ok && last_result_failed != Some(true);

        let leading: Vec<&str> = facts
            .commands
            .iter()
            .flat_map(|cmd| command_heads(cmd))
            .collect();
        let used_version_control = leading.iter().any(|t| *t == "git" || *t == "gh");
        let used_package_manager = leading.iter().any(|t| PACKAGE_MANAGERS.contains(t));
        let ran_scripts = leading
            .iter()
            .any(|t| SCRIPT_RUNNERS.contains(t) || t.starts_with("./"));

        let final_result = events
            .iter()
            .rev()
            .find_map(|e| match e {
                AgentEvent::Result { text: Some(t), .. } => Some(t.trim().to_string()),
                _ => None,
            })
            .filter(|t| is_speakable(t));

        let mut clauses = Vec::new();
        if let Some(c) = files_clause("modified", &facts.files_modified) {
            clauses.push(c);
        }
        if let Some(c) = files_clause("read", &facts.files_read) {
            clauses.push(c);
        }
        if !facts.commands.is_empty() {
            clauses.push(format!("ran {}", count_noun(facts.commands.len(), "command")));
        }
        if facts.errors > 0 {
            clauses.push(format!("ran into {}", count_noun(facts.errors, "error")));
        }

        let opening = if succeeded {
            EMPTY_COMPLETION
        } else {
            EMPTY_FAILURE
        };
        let mut sentences = Vec::new();
        if clauses.is_empty() {
            sentences.push(opening.to_string());
        } else {
            sentences.push(format!("{} I {}.", opening, join_clauses(&clauses)));
        }

        let mut activity = Vec::new();
        if used_version_control {
            activity.push("version control");
        }
        if used_package_manager {
            activity.push("the package manager");
        }
        if ran_scripts {
            activity.push("project scripts");
        }
        if !activity.is_empty() {
            let activity: Vec<String> = activity.into_iter().map(str::to_string).collect();
            sentences.push(format!("Along the way I used {}.", join_clauses(&activity)));
        }
        if let Some(ref result) = final_result {
            sentences.push(result.clone());
        }

        Self {
            tools_used: facts.tools_used,
            files_modified: facts.files_modified,
            files_read: facts.files_read,
            commands_run: facts.commands.len(),
            errors: facts.errors,
            events: events.len(),
            used_version_control,
            used_package_manager,
            ran_scripts,
            succeeded,
            final_result,
            text: sentences.join(" "),
        }
    }
}

/// First token of every `&&`, `||` or `;` separated segment.
fn command_heads(cmd: &str) -> Vec<&str> {
    cmd.split("&&")
        .flat_map(|s| s.split("||"))
        .flat_map(|s| s.split(';'))
        .filter_map(|segment| segment.split_whitespace().next())
        .collect()
}

/// Short prose is read aloud. Code-shaped text is not.
fn is_speakable(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() <= MAX_RESULT_SNIPPET
        && !CODE_MARKERS.iter().any(|m| text.contains(m))
}

fn count_noun(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

fn files_clause(verb: &str, files: &BTreeSet<String>) -> Option<String> {
    match files.len() {
        0 => None,
        n if n <= MAX_LISTED_FILES => {
            let names: Vec<String> = files.iter().cloned().collect();
            Some(format!("{} {}", verb, join_clauses(&names)))
        }
        n => Some(format!("{} {}", verb, count_noun(n, "file"))),
    }
}

fn join_clauses(parts: &[String]) -> String {
    match parts {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
