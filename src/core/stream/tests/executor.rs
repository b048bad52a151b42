use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::config::{AgentConfig, DenyAction, StreamingConfig};
use crate::core::notify::{InMemoryNotificationSink, NotificationKind, NotificationSink};
use crate::core::stream::{Frame, LineType, SessionTable, StreamRequest, StreamingExecutor};
use crate::platform::{NativePlatform, Platform};

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"agent-123"}"#;
const RM_RF: &str = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"rm -rf build"}}]}}"#;
const RESULT: &str = r#"{"type":"result","subtype":"success","result":"Fixed typo on line 12","session_id":"agent-123"}"#;

fn fake_agent(dir: &Path, body: &str) -> String {
    let path = dir.join("agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    NativePlatform::set_executable(&path);
    path.to_string_lossy().to_string()
}

fn emit(line: &str) -> String {
    format!("echo '{}'", line)
}

struct Harness {
    exec: Arc<StreamingExecutor>,
    notifier: Arc<InMemoryNotificationSink>,
}

fn harness(
    binary: String,
    deny_action: DenyAction,
    summary: Duration,
    approval: Duration,
) -> Harness {
    let notifier = Arc::new(InMemoryNotificationSink::new(20));
    let agent = AgentConfig {
        binary,
        ..AgentConfig::default()
    };
    let streaming = StreamingConfig {
        deny_action,
        ..StreamingConfig::default()
    };
    let exec = StreamingExecutor::new(
        agent,
        &streaming,
        Arc::new(SessionTable::new()),
        notifier.clone(),
    )
    .with_timings(summary, approval);
    Harness {
        exec: Arc::new(exec),
        notifier,
    }
}

fn request(dir: &Path, supervised: bool) -> StreamRequest {
    StreamRequest {
        description: "Fix typo in README.md".to_string(),
        path: dir.to_path_buf(),
        supervised,
        resume_session_id: None,
    }
}

async fn next(rx: &mut mpsc::Receiver<Frame>) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .ok()
        .flatten()
}

async fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = next(rx).await {
        frames.push(frame);
    }
    frames
}

fn kinds(frames: &[Frame]) -> Vec<&'static str> {
    frames.iter().map(Frame::kind).collect()
}

#[tokio::test]
async fn unattended_run_streams_frames_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let body = [
        emit(INIT),
        "echo 'plain progress text'".to_string(),
        emit(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"On it."}]}}"#),
        emit(RESULT),
    ]
    .join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(5),
    );

    let (session_id, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = drain(&mut rx).await;

    assert_eq!(
        kinds(&frames),
        vec!["session_start", "output", "raw", "output", "output", "complete"]
    );
    match &frames[0] {
        Frame::SessionStart {
            session_id: id,
            supervised,
            ..
        } => {
            assert_eq!(id, &session_id);
            assert!(!supervised);
        }
        other => panic!("unexpected first frame {:?}", other),
    }
    match frames.last().unwrap() {
        Frame::Complete {
            exit_code,
            success,
            total_lines,
            agent_session_id,
            summary,
            ..
        } => {
            assert_eq!(*exit_code, Some(0));
            assert!(success);
            assert_eq!(*total_lines, 4);
            assert_eq!(agent_session_id.as_deref(), Some("agent-123"));
            assert!(summary.contains("Fixed typo on line 12"));
        }
        other => panic!("unexpected last frame {:?}", other),
    }

    let notes = h.notifier.recent(10);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Success);
    assert!(h.exec.sessions().get(&session_id).is_none());
}

#[tokio::test]
async fn approval_decision_unblocks_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let body = [emit(INIT), emit(RM_RF), emit(RESULT)].join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (session_id, mut rx) = h.exec.start(request(dir.path(), true));
    let mut frames = Vec::new();
    while let Some(frame) = next(&mut rx).await {
        let waiting = matches!(frame, Frame::ApprovalNeeded { .. });
        frames.push(frame);
        if waiting {
            let pending = h.exec.sessions().get(&session_id).unwrap();
            assert!(pending.pending_approval);
            h.exec
                .sessions()
                .submit_decision(&session_id, true)
                .unwrap();
            let after = tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .expect("stream resumed within one poll interval")
                .unwrap();
            frames.push(after);
        }
    }

    let approved = frames
        .iter()
        .position(|f| {
            matches!(
                f,
                Frame::Output { content, line_type: LineType::System }
                    if content.starts_with("Approved")
            )
        })
        .expect("approval recorded on the stream");
    let needed = frames
        .iter()
        .position(|f| matches!(f, Frame::ApprovalNeeded { .. }))
        .unwrap();
    assert_eq!(approved, needed + 1);
    assert!(matches!(frames.last(), Some(Frame::Complete { success: true, .. })));

    let kinds: Vec<NotificationKind> = h.notifier.recent(10).iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::Success, NotificationKind::Milestone]);
}

#[tokio::test]
async fn unanswered_approval_times_out_as_denial() {
    let dir = tempfile::tempdir().unwrap();
    let body = [emit(RM_RF), emit(RESULT)].join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_millis(100),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), true));
    let frames = drain(&mut rx).await;
    let k = kinds(&frames);
    let needed = k.iter().position(|k| *k == "approval_needed").unwrap();
    assert_eq!(k[needed + 1], "approval_timeout");
    // record mode keeps consuming the stream
    assert!(matches!(frames.last(), Some(Frame::Complete { success: true, .. })));
}

#[tokio::test]
async fn unattended_sessions_do_not_ask_for_bash_approval() {
    let dir = tempfile::tempdir().unwrap();
    let body = [emit(RM_RF), emit(RESULT)].join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = drain(&mut rx).await;
    assert!(!kinds(&frames).contains(&"approval_needed"));
}

#[tokio::test]
async fn terminate_mode_stops_agent_after_denial() {
    let dir = tempfile::tempdir().unwrap();
    let body = [emit(RM_RF), "sleep 5".to_string(), emit(RESULT)].join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Terminate,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (session_id, mut rx) = h.exec.start(request(dir.path(), true));
    let started = std::time::Instant::now();
    let mut frames = Vec::new();
    while let Some(frame) = next(&mut rx).await {
        if matches!(frame, Frame::ApprovalNeeded { .. }) {
            h.exec
                .sessions()
                .submit_decision(&session_id, false)
                .unwrap();
        }
        frames.push(frame);
    }

    assert!(started.elapsed() < Duration::from_secs(4));
    let k = kinds(&frames);
    assert_eq!(&k[k.len() - 2..], ["error", "complete"]);
    assert!(matches!(frames.last(), Some(Frame::Complete { success: false, .. })));
    assert_eq!(h.notifier.recent(10)[0].kind, NotificationKind::Error);
}

#[tokio::test]
async fn quiet_periods_still_produce_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let tool = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Edit","input":{"file_path":"/r/README.md"}}]}}"#;
    let mut lines = Vec::new();
    for _ in 0..8 {
        lines.push(emit(tool));
        lines.push("sleep 0.05".to_string());
    }
    lines.push(emit(RESULT));
    let h = harness(
        fake_agent(dir.path(), &lines.join("\n")),
        DenyAction::Record,
        Duration::from_millis(100),
        Duration::from_secs(30),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = drain(&mut rx).await;
    let k = kinds(&frames);
    let first_summary = k.iter().position(|k| *k == "summary").expect("a summary frame");
    assert!(first_summary < k.len() - 1);
    assert_eq!(*k.last().unwrap(), "complete");

    match &frames[first_summary] {
        Frame::Summary { content, details } => {
            assert!(content.contains("README.md"));
            assert!(details.files_modified.contains("README.md"));
        }
        other => panic!("expected summary, got {:?}", other),
    }
}

#[tokio::test]
async fn failing_agent_reports_stderr_before_complete() {
    let dir = tempfile::tempdir().unwrap();
    let body = [
        emit(INIT),
        "echo 'authentication required' >&2".to_string(),
        "exit 2".to_string(),
    ]
    .join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = drain(&mut rx).await;
    let n = frames.len();
    assert!(matches!(
        &frames[n - 2],
        Frame::Error { message } if message.contains("authentication required")
    ));
    match &frames[n - 1] {
        Frame::Complete {
            success: false,
            exit_code: Some(2),
            summary,
            ..
        } => assert!(summary.starts_with("I couldn't finish the task."), "{}", summary),
        other => panic!("expected a failed completion, got {:?}", other),
    }
    assert_eq!(h.notifier.recent(10)[0].kind, NotificationKind::Error);
}

#[tokio::test]
async fn undecodable_bytes_become_a_raw_frame() {
    let dir = tempfile::tempdir().unwrap();
    let body = [
        emit(INIT),
        r"printf 'bad \377\376 bytes\n'".to_string(),
        emit(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Still here."}]}}"#,
        ),
        emit(RESULT),
    ]
    .join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = drain(&mut rx).await;
    assert_eq!(
        kinds(&frames),
        vec!["session_start", "output", "raw", "output", "output", "complete"]
    );
    assert!(matches!(
        &frames[2],
        Frame::Raw { content } if content.starts_with("bad ") && content.contains('\u{FFFD}')
    ));
    assert!(matches!(
        &frames[3],
        Frame::Output { content, .. } if content == "Still here."
    ));
    assert!(matches!(
        frames.last(),
        Some(Frame::Complete { success: true, total_lines: 4, .. })
    ));
    assert_eq!(h.notifier.recent(10)[0].kind, NotificationKind::Success);
}

#[tokio::test]
async fn undecodable_bytes_do_not_stall_a_busy_agent() {
    let dir = tempfile::tempdir().unwrap();
    let chatter = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"working"}]}}"#;
    let body = [
        r"printf 'bad \377\376 bytes\n'".to_string(),
        format!(
            "i=0\nwhile [ $i -lt 2000 ]; do echo '{}'; i=$((i+1)); done",
            chatter
        ),
        emit(RESULT),
    ]
    .join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = tokio::time::timeout(Duration::from_secs(30), drain(&mut rx))
        .await
        .expect("session finished");
    assert!(matches!(
        frames.last(),
        Some(Frame::Complete { success: true, total_lines: 2002, .. })
    ));
}

#[tokio::test]
async fn missing_agent_binary_completes_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path().join("missing").to_string_lossy().to_string(),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (_, mut rx) = h.exec.start(request(dir.path(), false));
    let frames = drain(&mut rx).await;
    assert_eq!(kinds(&frames), vec!["session_start", "error", "complete"]);
    assert_eq!(h.notifier.recent(10).len(), 1);
}

#[tokio::test]
async fn client_disconnect_stops_the_agent() {
    let dir = tempfile::tempdir().unwrap();
    let body = [emit(INIT), "exec sleep 30".to_string()].join("\n");
    let h = harness(
        fake_agent(dir.path(), &body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );

    let (session_id, mut rx) = h.exec.start(request(dir.path(), false));
    assert!(matches!(next(&mut rx).await, Some(Frame::SessionStart { .. })));
    assert!(matches!(next(&mut rx).await, Some(Frame::Output { .. })));
    drop(rx);

    for _ in 0..250 {
        if h.exec.sessions().get(&session_id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.exec.sessions().get(&session_id).is_none());
    let notes = h.notifier.recent(10);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Task cancelled");
}

#[tokio::test]
async fn resume_id_is_reported_until_the_agent_sends_its_own() {
    let dir = tempfile::tempdir().unwrap();
    let body = "echo 'args:' \"$@\" >&2\nexit 0";
    let h = harness(
        fake_agent(dir.path(), body),
        DenyAction::Record,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );
    let mut req = request(dir.path(), false);
    req.resume_session_id = Some("agent-prev".to_string());

    let (_, mut rx) = h.exec.start(req);
    let frames = drain(&mut rx).await;
    assert!(matches!(&frames[0], Frame::SessionStart { resumed: true, .. }));
    match frames.last().unwrap() {
        Frame::Complete {
            agent_session_id, ..
        } => assert_eq!(agent_session_id.as_deref(), Some("agent-prev")),
        other => panic!("unexpected {:?}", other),
    }
}
