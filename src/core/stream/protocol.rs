//! Agent event decoding and the wire frames pushed to streaming clients.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use super::summary::{CompletionSummary, ProgressSummary};
use crate::core::notify::truncate_chars;

const PREVIEW_CHARS: usize = 200;
const COMMAND_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse { name: String, input: Value },
    Thinking(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

/// One decoded line of the agent's `stream-json` output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    System {
        subtype: String,
        message: Option<String>,
        is_error: bool,
    },
    Assistant {
        blocks: Vec<ContentBlock>,
    },
    User {
        results: Vec<ToolOutput>,
    },
    ToolResult(ToolOutput),
    Result {
        success: bool,
        text: Option<String>,
    },
    Unrecognized(Value),
}

impl AgentEvent {
    pub fn from_value(value: &Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "system" => AgentEvent::System {
                subtype: str_field(value, "subtype").unwrap_or_default(),
                message: str_field(value, "message").or_else(|| str_field(value, "text")),
                is_error: value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    || value.get("level").and_then(Value::as_str) == Some("error"),
            },
            "assistant" => AgentEvent::Assistant {
                blocks: message_content(value)
                    .iter()
                    .filter_map(content_block)
                    .collect(),
            },
            "user" => AgentEvent::User {
                results: message_content(value)
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
                    .map(tool_output)
                    .collect(),
            },
            "tool_result" => AgentEvent::ToolResult(tool_output(value)),
            "result" => {
                let is_error = value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("success");
                AgentEvent::Result {
                    success: !is_error && !subtype.starts_with("error"),
                    text: str_field(value, "result"),
                }
            }
            _ => AgentEvent::Unrecognized(value.clone()),
        }
    }

    /// Tool invocations carried by this event as `(name, input)`.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &Value)> {
        let blocks: &[ContentBlock] = match self {
            AgentEvent::Assistant { blocks } => blocks,
            _ => &[],
        };
        blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { name, input } => Some((name.as_str(), input)),
            _ => None,
        })
    }

    pub fn is_error(&self) -> bool {
        match self {
            AgentEvent::System { is_error, .. } => *is_error,
            AgentEvent::ToolResult(out) => out.is_error,
            AgentEvent::User { results } => results.iter().any(|r| r.is_error),
            AgentEvent::Result { success, .. } => !success,
            _ => false,
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn message_content(value: &Value) -> Vec<Value> {
    let content = value
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| value.get("content"));
    match content {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(text)) => vec![serde_json::json!({ "type": "text", "text": text })],
        _ => Vec::new(),
    }
}

fn content_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text(str_field(block, "text").unwrap_or_default())),
        "tool_use" => Some(ContentBlock::ToolUse {
            name: str_field(block, "name").unwrap_or_else(|| "unknown".to_string()),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "thinking" => Some(ContentBlock::Thinking(
            str_field(block, "thinking").unwrap_or_default(),
        )),
        _ => None,
    }
}

fn tool_output(value: &Value) -> ToolOutput {
    let content = match value.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    ToolOutput {
        content,
        is_error: value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// The agent's own session id, wherever the event carries one.
pub fn capture_session_id(value: &Value) -> Option<String> {
    ["session_id", "sessionId"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .or_else(|| {
            value
                .get("message")
                .and_then(|m| m.get("session_id"))
                .and_then(Value::as_str)
        })
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineType {
    System,
    Assistant,
    Tool,
    ToolResult,
    Thinking,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub content: String,
    pub line_type: LineType,
}

impl OutputLine {
    fn new(line_type: LineType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            line_type,
        }
    }
}

/// Display lines for an event. Tool invocations become short labels instead
/// of raw input.
pub fn classify(event: &AgentEvent) -> Vec<OutputLine> {
    match event {
        AgentEvent::System {
            subtype,
            message,
            is_error,
        } => {
            let line_type = if *is_error {
                LineType::Error
            } else {
                LineType::System
            };
            let content = match (subtype.as_str(), message) {
                ("init", _) => "Agent session started".to_string(),
                (sub, Some(msg)) if !sub.is_empty() => format!("[{}] {}", sub, msg),
                (_, Some(msg)) => msg.clone(),
                (sub, None) => format!("[{}]", sub),
            };
            vec![OutputLine::new(line_type, content)]
        }
        AgentEvent::Assistant { blocks } => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) if !text.trim().is_empty() => {
                    Some(OutputLine::new(LineType::Assistant, text.trim()))
                }
                ContentBlock::Text(_) => None,
                ContentBlock::ToolUse { name, input } => {
                    Some(OutputLine::new(LineType::Tool, describe_tool(name, input)))
                }
                ContentBlock::Thinking(text) if !text.trim().is_empty() => Some(OutputLine::new(
                    LineType::Thinking,
                    truncate_chars(text.trim(), PREVIEW_CHARS),
                )),
                ContentBlock::Thinking(_) => None,
            })
            .collect(),
        AgentEvent::User { results } => results.iter().map(tool_output_line).collect(),
        AgentEvent::ToolResult(out) => vec![tool_output_line(out)],
        AgentEvent::Result { success, text } => {
            let (line_type, label) = if *success {
                (LineType::Success, "Task finished")
            } else {
                (LineType::Error, "Task failed")
            };
            let content = match text.as_deref().map(str::trim) {
                Some(t) if !t.is_empty() => {
                    format!("{}: {}", label, truncate_chars(t, PREVIEW_CHARS))
                }
                _ => label.to_string(),
            };
            vec![OutputLine::new(line_type, content)]
        }
        AgentEvent::Unrecognized(value) => vec![OutputLine::new(
            LineType::System,
            truncate_chars(&value.to_string(), PREVIEW_CHARS),
        )],
    }
}

fn tool_output_line(out: &ToolOutput) -> OutputLine {
    let line_type = if out.is_error {
        LineType::Error
    } else {
        LineType::ToolResult
    };
    let content = out.content.trim();
    let content = if content.is_empty() {
        "(no output)".to_string()
    } else {
        truncate_chars(content, PREVIEW_CHARS)
    };
    OutputLine::new(line_type, content)
}

/// Trailing path component, or the input when it has none.
pub fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn input_str<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| input.get(*k).and_then(Value::as_str))
}

/// Short human label for a tool invocation.
pub fn describe_tool(name: &str, input: &Value) -> String {
    let path = input_str(input, &["file_path", "path", "notebook_path"]).map(file_name);
    match name {
        "Bash" => match input_str(input, &["command"]) {
            Some(cmd) => format!("$ {}", truncate_chars(cmd.trim(), COMMAND_PREVIEW_CHARS)),
            None => "Running a shell command".to_string(),
        },
        "Read" => format!("Reading {}", path.unwrap_or_else(|| "a file".to_string())),
        "Write" => format!("Writing {}", path.unwrap_or_else(|| "a file".to_string())),
        "Edit" | "MultiEdit" | "NotebookEdit" => {
            format!("Editing {}", path.unwrap_or_else(|| "a file".to_string()))
        }
        "Glob" => format!(
            "Finding files matching {}",
            input_str(input, &["pattern"]).unwrap_or("*")
        ),
        "Grep" => format!(
            "Searching for '{}'",
            input_str(input, &["pattern"]).unwrap_or("")
        ),
        "LS" => format!("Listing {}", path.unwrap_or_else(|| ".".to_string())),
        "WebFetch" => format!("Fetching {}", input_str(input, &["url"]).unwrap_or("a page")),
        "WebSearch" => format!(
            "Searching the web for '{}'",
            input_str(input, &["query"]).unwrap_or("")
        ),
        "TodoWrite" => "Updating the task list".to_string(),
        "Task" => format!(
            "Delegating: {}",
            truncate_chars(
                input_str(input, &["description", "prompt"]).unwrap_or("subtask"),
                COMMAND_PREVIEW_CHARS
            )
        ),
        other => format!("Using {}", other),
    }
}

/// Frames pushed to a streaming client, one SSE `data:` payload each.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    SessionStart {
        session_id: String,
        description: String,
        path: String,
        supervised: bool,
        resumed: bool,
    },
    Output {
        content: String,
        line_type: LineType,
    },
    ApprovalNeeded {
        session_id: String,
        description: String,
        timeout_secs: u64,
    },
    ApprovalTimeout {
        session_id: String,
        message: String,
    },
    Summary {
        content: String,
        details: ProgressSummary,
    },
    Complete {
        exit_code: Option<i32>,
        success: bool,
        total_lines: usize,
        summary: String,
        agent_session_id: Option<String>,
        details: CompletionSummary,
    },
    Error {
        message: String,
    },
    Raw {
        content: String,
    },
}

impl Frame {
    pub fn output(line: OutputLine) -> Self {
        Frame::Output {
            content: line.content,
            line_type: line.line_type,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Frame::Output {
            content: content.into(),
            line_type: LineType::System,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::SessionStart { .. } => "session_start",
            Frame::Output { .. } => "output",
            Frame::ApprovalNeeded { .. } => "approval_needed",
            Frame::ApprovalTimeout { .. } => "approval_timeout",
            Frame::Summary { .. } => "summary",
            Frame::Complete { .. } => "complete",
            Frame::Error { .. } => "error",
            Frame::Raw { .. } => "raw",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> AgentEvent {
        AgentEvent::from_value(&value)
    }

    #[test]
    fn assistant_blocks_are_classified_individually() {
        let event = decode(json!({
            "type": "assistant",
            "message": { "content": [
                { "type": "thinking", "thinking": "Let me look at the README" },
                { "type": "text", "text": "I'll fix the typo." },
                { "type": "tool_use", "name": "Edit", "input": { "file_path": "/repo/docs/README.md" } }
            ]}
        }));
        let lines = classify(&event);
        assert_eq!(
            lines.iter().map(|l| l.line_type).collect::<Vec<_>>(),
            vec![LineType::Thinking, LineType::Assistant, LineType::Tool]
        );
        assert_eq!(lines[2].content, "Editing README.md");
    }

    #[test]
    fn bash_commands_are_previewed() {
        let long = format!("echo {}", "x".repeat(200));
        assert_eq!(describe_tool("Bash", &json!({ "command": "ls -la" })), "$ ls -la");
        assert!(describe_tool("Bash", &json!({ "command": long })).ends_with("..."));
        assert_eq!(describe_tool("Mystery", &json!({})), "Using Mystery");
    }

    #[test]
    fn tool_results_come_from_user_events() {
        let event = decode(json!({
            "type": "user",
            "message": { "content": [
                { "type": "tool_result", "content": "total 8", "is_error": false },
                { "type": "tool_result", "content": [{ "type": "text", "text": "denied" }], "is_error": true }
            ]}
        }));
        let lines = classify(&event);
        assert_eq!(lines[0], OutputLine::new(LineType::ToolResult, "total 8"));
        assert_eq!(lines[1], OutputLine::new(LineType::Error, "denied"));
        assert!(event.is_error());
    }

    #[test]
    fn result_event_reports_success_or_failure() {
        let ok = decode(json!({ "type": "result", "subtype": "success", "result": "Done" }));
        assert_eq!(classify(&ok)[0].line_type, LineType::Success);

        let failed =
            decode(json!({ "type": "result", "subtype": "error_max_turns", "is_error": true }));
        assert_eq!(classify(&failed)[0].line_type, LineType::Error);
        assert_eq!(classify(&failed)[0].content, "Task failed");
    }

    #[test]
    fn unknown_events_are_forwarded_as_truncated_json() {
        let event = decode(json!({ "type": "mystery", "blob": "y".repeat(500) }));
        let lines = classify(&event);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_type, LineType::System);
        assert!(lines[0].content.ends_with("..."));
    }

    #[test]
    fn session_id_is_found_at_top_level_or_in_message() {
        assert_eq!(
            capture_session_id(&json!({ "type": "system", "session_id": "abc" })).as_deref(),
            Some("abc")
        );
        assert_eq!(
            capture_session_id(&json!({ "message": { "session_id": "nested" } })).as_deref(),
            Some("nested")
        );
        assert!(capture_session_id(&json!({ "session_id": "" })).is_none());
    }

    #[test]
    fn frames_serialize_with_type_tag() {
        let frame = Frame::output(OutputLine::new(LineType::ToolResult, "ok"));
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "output");
        assert_eq!(value["line_type"], "tool-result");
        assert_eq!(frame.kind(), "output");

        let raw: Value =
            serde_json::from_str(&Frame::Raw { content: "plain".into() }.to_json()).unwrap();
        assert_eq!(raw["type"], "raw");
    }
}
