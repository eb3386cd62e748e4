//! Integration tests for the subprocess adapter against real children.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use mcplink_bridge::SubprocessAdapter;
use mcplink_core::domain::{ServerDefinition, ServerKind};

fn stdio_server(command: &str, args: &[&str]) -> ServerDefinition {
    ServerDefinition {
        name: "test".to_string(),
        kind: ServerKind::Stdio,
        command: Some(command.to_string()),
        args: args.iter().map(|a| (*a).to_string()).collect(),
        env: BTreeMap::new(),
        url: None,
        headers: BTreeMap::new(),
        disabled: false,
    }
}

#[tokio::test]
async fn frames_round_trip_through_cat() {
    let mut adapter = SubprocessAdapter::spawn(&stdio_server("cat", &[])).unwrap();

    let frame = r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":{"x":1}}"#;
    adapter.writer().send(frame.to_string()).await.unwrap();

    let out = timeout(Duration::from_secs(5), adapter.next_frame())
        .await
        .expect("frame within 5s")
        .expect("stream open");
    assert_eq!(out.text, frame);
    assert_eq!(out.value["params"]["x"], 1);

    adapter.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn non_json_stdout_lines_are_dropped() {
    // The child prints a diagnostic line, then a valid frame.
    let script = r#"echo "starting up..."; echo '{"jsonrpc":"2.0","id":2,"result":{}}'; sleep 5"#;
    let mut adapter = SubprocessAdapter::spawn(&stdio_server("sh", &["-c", script])).unwrap();

    let out = timeout(Duration::from_secs(5), adapter.next_frame())
        .await
        .expect("frame within 5s")
        .expect("stream open");
    assert_eq!(out.value["id"], 2);

    adapter.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn partial_line_at_eof_is_discarded() {
    // One complete frame, then a partial line with no trailing newline.
    let script = r#"echo '{"jsonrpc":"2.0","id":3,"result":{}}'; printf '{"partial'"#;
    let mut adapter = SubprocessAdapter::spawn(&stdio_server("sh", &["-c", script])).unwrap();

    let out = timeout(Duration::from_secs(5), adapter.next_frame())
        .await
        .expect("frame within 5s")
        .expect("stream open");
    assert_eq!(out.value["id"], 3);

    // The partial remainder never surfaces; the stream just ends.
    let end = timeout(Duration::from_secs(5), adapter.next_frame())
        .await
        .expect("EOF within 5s");
    assert!(end.is_none());

    adapter.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn stderr_noise_does_not_affect_framing() {
    let script = r#"echo "diagnostic" >&2; echo '{"jsonrpc":"2.0","id":4,"result":{}}'; sleep 5"#;
    let mut adapter = SubprocessAdapter::spawn(&stdio_server("sh", &["-c", script])).unwrap();

    let out = timeout(Duration::from_secs(5), adapter.next_frame())
        .await
        .expect("frame within 5s")
        .expect("stream open");
    assert_eq!(out.value["id"], 4);

    adapter.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn exit_watch_fires_when_the_child_dies() {
    let adapter = SubprocessAdapter::spawn(&stdio_server("true", &[])).unwrap();
    let mut exit = adapter.exit_watch();

    let status = {
        let guard = timeout(Duration::from_secs(5), exit.wait_for(Option::is_some))
            .await
            .expect("exit within 5s")
            .expect("watch open");
        *guard
    };
    assert!(status.expect("status recorded").success());
}

#[tokio::test]
async fn shutdown_terminates_a_sleeping_child_within_grace() {
    let adapter = SubprocessAdapter::spawn(&stdio_server("sleep", &["30"])).unwrap();

    let started = Instant::now();
    adapter.shutdown(Duration::from_secs(5)).await;
    // sleep responds to SIGTERM immediately; nowhere near the grace cap.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn spawn_failure_is_a_terminal_error() {
    let result = SubprocessAdapter::spawn(&stdio_server("/nonexistent/tool-server", &[]));
    assert!(result.is_err());
}
