//! Streaming agent runs.
//!
//! Each session runs on its own tokio task that owns the child process and
//! its stdout reader. Frames go out over an mpsc channel in the order lines
//! are read. Approval waits block only that session's read loop.

pub mod permission;
pub mod protocol;
pub mod sessions;
pub mod summary;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::config::{AgentConfig, DenyAction, StreamingConfig};
use crate::core::executor::{AgentCommand, OutputMode};
use crate::core::notify::{Notification, NotificationKind, NotificationSink};

pub use permission::{ApprovalPolicy, is_permission_request, permission_request};
pub use protocol::{AgentEvent, Frame, LineType};
pub use sessions::{ApprovalOutcome, SessionError, SessionGuard, SessionSnapshot, SessionTable};
pub use summary::{CompletionSummary, ProgressSummary};

pub const STDERR_TAIL_CHARS: usize = 2000;
const FRAME_BUFFER: usize = 64;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub description: String,
    pub path: PathBuf,
    /// Tool use is not pre-authorized and mid-stream approvals are enforced.
    pub supervised: bool,
    pub resume_session_id: Option<String>,
}

pub struct StreamingExecutor {
    agent: AgentConfig,
    dangerous_patterns: Vec<String>,
    deny_action: DenyAction,
    summary_interval: Duration,
    approval_timeout: Duration,
    sessions: Arc<SessionTable>,
    notifier: Arc<dyn NotificationSink>,
}

impl StreamingExecutor {
    pub fn new(
        agent: AgentConfig,
        streaming: &StreamingConfig,
        sessions: Arc<SessionTable>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            agent,
            dangerous_patterns: streaming.dangerous_patterns.clone(),
            deny_action: streaming.deny_action,
            summary_interval: Duration::from_secs(streaming.summary_interval_secs.max(1)),
            approval_timeout: Duration::from_secs(streaming.approval_timeout_secs.max(1)),
            sessions,
            notifier,
        }
    }

    pub fn with_timings(mut self, summary_interval: Duration, approval_timeout: Duration) -> Self {
        self.summary_interval = summary_interval;
        self.approval_timeout = approval_timeout;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Register a session and start the agent on its own task. Frames arrive
    /// on the returned receiver; dropping it stops the agent.
    pub fn start(self: &Arc<Self>, request: StreamRequest) -> (String, mpsc::Receiver<Frame>) {
        self.start_with_id(uuid::Uuid::new_v4().to_string(), request)
    }

    /// Like [`start`](Self::start) with a caller-chosen session id, so the id
    /// can be handed to the policy service before the agent starts.
    pub fn start_with_id(
        self: &Arc<Self>,
        session_id: String,
        request: StreamRequest,
    ) -> (String, mpsc::Receiver<Frame>) {
        let guard = self.sessions.register(&session_id, &request.description);
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_session(guard, request, tx).await;
        });
        (session_id, rx)
    }

    async fn run_session(
        &self,
        guard: SessionGuard,
        request: StreamRequest,
        tx: mpsc::Sender<Frame>,
    ) {
        let session_id = guard.session_id().to_string();
        let mut command = AgentCommand::new(
            &self.agent,
            &request.description,
            &request.path,
            OutputMode::StreamJson,
        )
        .resume(request.resume_session_id.clone());
        if request.supervised {
            command = command.supervised();
        }

        let _ = tx
            .send(Frame::SessionStart {
                session_id: session_id.clone(),
                description: request.description.clone(),
                path: request.path.display().to_string(),
                supervised: command.is_supervised(),
                resumed: request.resume_session_id.is_some(),
            })
            .await;

        let mut child = match command.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("Failed to start agent '{}': {}", command.binary(), e);
                error!("Streaming session [{}] {}", session_id, msg);
                let _ = tx.send(Frame::error(msg.clone())).await;
                let summary = CompletionSummary::from_events(&[], false);
                let _ = tx
                    .send(Frame::Complete {
                        exit_code: None,
                        success: false,
                        total_lines: 0,
                        summary: summary.text.clone(),
                        agent_session_id: request.resume_session_id.clone(),
                        details: summary,
                    })
                    .await;
                self.notifier
                    .notify(Notification::outcome(
                        NotificationKind::Error,
                        &session_id,
                        "Task failed",
                        &request.description,
                        &msg,
                    ))
                    .await;
                return;
            }
        };
        self.sessions.set_pid(&session_id, child.id());
        info!(
            "Streaming session [{}] started agent in {}",
            session_id,
            request.path.display()
        );

        let stderr_task = child.stderr.take().map(|s| tokio::spawn(collect_stderr(s)));
        let Some(stdout) = child.stdout.take() else {
            warn!("Streaming session [{}] has no stdout pipe", session_id);
            let _ = child.kill().await;
            return;
        };
        let mut stdout = BufReader::new(stdout);
        let mut line_buf: Vec<u8> = Vec::new();

        let mut run = SessionRun {
            exec: self,
            session_id: session_id.clone(),
            description: request.description.clone(),
            tx: tx.clone(),
            policy: ApprovalPolicy::new(self.dangerous_patterns.clone(), !command.is_supervised()),
            buffer: Vec::new(),
            history: Vec::new(),
            total_lines: 0,
            agent_session_id: request.resume_session_id.clone(),
            last_summary: Instant::now(),
        };

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.summary_interval,
            self.summary_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stop: Option<Stop> = None;
        loop {
            tokio::select! {
                // read_until keeps partial bytes in line_buf if another arm wins
                read = stdout.read_until(b'\n', &mut line_buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(&line_buf);
                        line_buf.clear();
                        if let Some(reason) = run.handle_line(&line).await {
                            stop = Some(reason);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Streaming session [{}] read error: {}", session_id, e);
                        stop = Some(Stop::Terminated(format!(
                            "failed to read agent output: {}",
                            e
                        )));
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !run.maybe_summarize().await {
                        stop = Some(Stop::Disconnected);
                        break;
                    }
                }
                _ = tx.closed() => {
                    stop = Some(Stop::Disconnected);
                    break;
                }
            }
        }

        if let Some(ref reason) = stop {
            info!(
                "Streaming session [{}] stopping agent: {}",
                session_id,
                reason.describe()
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill agent for [{}]: {}", session_id, e);
            }
        }

        let status = child.wait().await;
        let stderr_tail = match stderr_task {
            Some(task) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
                Ok(Ok(tail)) => tail,
                _ => String::new(),
            },
            None => String::new(),
        };

        let exit_code = status.as_ref().ok().and_then(|s| s.code());
        let exited_ok = status.as_ref().map(|s| s.success()).unwrap_or(false);
        let success = exited_ok && stop.is_none();

        let summary = CompletionSummary::from_events(&run.history, success);
        match stop {
            Some(Stop::Disconnected) => {
                debug!("Streaming session [{}] client went away", session_id);
            }
            Some(Stop::Terminated(ref why)) => {
                run.emit(Frame::error(format!("Agent stopped: {}", why))).await;
            }
            None => {
                if !exited_ok && !stderr_tail.trim().is_empty() {
                    run.emit(Frame::error(stderr_tail.trim().to_string())).await;
                }
            }
        }
        run.emit(Frame::Complete {
            exit_code,
            success,
            total_lines: run.total_lines,
            summary: summary.text.clone(),
            agent_session_id: run.agent_session_id.clone(),
            details: summary.clone(),
        })
        .await;
        self.sessions.mark_completed(&session_id);

        let (kind, title, detail) = match stop {
            Some(Stop::Disconnected) => (
                NotificationKind::Error,
                "Task cancelled",
                "The client disconnected and the agent was stopped".to_string(),
            ),
            Some(Stop::Terminated(why)) => (NotificationKind::Error, "Task stopped", why),
            None if success => (NotificationKind::Success, "Task completed", summary.text),
            None => (
                NotificationKind::Error,
                "Task failed",
                match exit_code {
                    Some(code) => format!("Agent exited with code {}", code),
                    None => "Agent exited abnormally".to_string(),
                },
            ),
        };
        info!(
            "Streaming session [{}] finished (exit {:?}, {} lines)",
            session_id, exit_code, run.total_lines
        );
        self.notifier
            .notify(Notification::outcome(
                kind,
                &session_id,
                title,
                &request.description,
                &detail,
            ))
            .await;
        drop(guard);
    }
}

/// One stdout line without its terminator. Bytes that are not UTF-8 are
/// replaced so the line still reaches the caller.
fn decode_line(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stop {
    Disconnected,
    Terminated(String),
}

impl Stop {
    fn describe(&self) -> &str {
        match self {
            Stop::Disconnected => "client disconnected",
            Stop::Terminated(why) => why,
        }
    }
}

/// Mutable state of one session's read loop.
struct SessionRun<'a> {
    exec: &'a StreamingExecutor,
    session_id: String,
    description: String,
    tx: mpsc::Sender<Frame>,
    policy: ApprovalPolicy,
    buffer: Vec<AgentEvent>,
    history: Vec<AgentEvent>,
    total_lines: usize,
    agent_session_id: Option<String>,
    last_summary: Instant,
}

impl SessionRun<'_> {
    /// Send a frame. False once the client is gone.
    async fn emit(&self, frame: Frame) -> bool {
        if self.tx.send(frame).await.is_err() {
            debug!("Dropping frame for [{}]: client gone", self.session_id);
            return false;
        }
        true
    }

    async fn handle_line(&mut self, line: &str) -> Option<Stop> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.total_lines += 1;

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            if !self
                .emit(Frame::Raw {
                    content: line.to_string(),
                })
                .await
            {
                return Some(Stop::Disconnected);
            }
            return None;
        };

        if let Some(id) = protocol::capture_session_id(&value) {
            self.exec.sessions.set_agent_session_id(&self.session_id, &id);
            self.agent_session_id = Some(id);
        }

        let event = AgentEvent::from_value(&value);
        for out in protocol::classify(&event) {
            if !self.emit(Frame::output(out)).await {
                return Some(Stop::Disconnected);
            }
        }
        let approval = permission_request(&event, &self.policy);
        self.buffer.push(event.clone());
        self.history.push(event);

        if let Some(description) = approval
            && let Some(stop) = self.request_approval(&description).await
        {
            return Some(stop);
        }

        if !self.maybe_summarize().await {
            return Some(Stop::Disconnected);
        }
        None
    }

    async fn request_approval(&mut self, description: &str) -> Option<Stop> {
        let exec = self.exec;
        let sessions = &exec.sessions;
        let rx = sessions.begin_approval(&self.session_id, description)?;
        let timeout = exec.approval_timeout;
        info!(
            "Streaming session [{}] waiting for approval: {}",
            self.session_id, description
        );
        if !self
            .emit(Frame::ApprovalNeeded {
                session_id: self.session_id.clone(),
                description: description.to_string(),
                timeout_secs: timeout.as_secs(),
            })
            .await
        {
            return Some(Stop::Disconnected);
        }
        exec.notifier
            .notify(Notification::outcome(
                NotificationKind::Milestone,
                &self.session_id,
                "Approval needed",
                &self.description,
                description,
            ))
            .await;

        let outcome = tokio::select! {
            outcome = sessions.await_decision(&self.session_id, rx, timeout) => outcome,
            _ = self.tx.closed() => return Some(Stop::Disconnected),
        };

        let terminate = exec.deny_action == DenyAction::Terminate;
        let delivered = match outcome {
            ApprovalOutcome::Approved => {
                self.emit(Frame::system(format!("Approved: {}", description)))
                    .await
            }
            ApprovalOutcome::Denied => {
                let delivered = self
                    .emit(Frame::system(format!("Denied: {}", description)))
                    .await;
                if terminate {
                    return Some(Stop::Terminated("approval denied".to_string()));
                }
                delivered
            }
            ApprovalOutcome::TimedOut => {
                let delivered = self
                    .emit(Frame::ApprovalTimeout {
                        session_id: self.session_id.clone(),
                        message: format!(
                            "No decision within {}s, treating as denied",
                            timeout.as_secs()
                        ),
                    })
                    .await;
                if terminate {
                    return Some(Stop::Terminated("approval timed out".to_string()));
                }
                delivered
            }
        };
        // the wait can be long; do not let it trigger an immediate summary
        self.last_summary = Instant::now();
        if delivered { None } else { Some(Stop::Disconnected) }
    }

    /// Emit a progress summary once the interval has passed and something
    /// happened. False once the client is gone.
    async fn maybe_summarize(&mut self) -> bool {
        if self.buffer.is_empty() || self.last_summary.elapsed() < self.exec.summary_interval {
            return true;
        }
        let summary = ProgressSummary::from_events(&self.buffer);
        self.buffer.clear();
        self.last_summary = Instant::now();
        self.emit(Frame::Summary {
            content: summary.text.clone(),
            details: summary,
        })
        .await
    }
}

/// Last [`STDERR_TAIL_CHARS`] characters of the agent's stderr.
async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut tail = String::new();
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Ok(n) = reader.read_until(b'\n', &mut buf).await {
        if n == 0 {
            break;
        }
        tail.push_str(&decode_line(&buf));
        tail.push('\n');
        buf.clear();
        if tail.len() > STDERR_TAIL_CHARS * 4 {
            tail = tail_chars(&tail, STDERR_TAIL_CHARS);
        }
    }
    tail_chars(&tail, STDERR_TAIL_CHARS)
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

#[cfg(test)]
mod tests;
