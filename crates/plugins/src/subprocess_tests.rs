// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn stdin_json_reaches_the_tool_and_stdout_comes_back() {
    let input = json!({ "query": "fn main", "limit": 3 });
    let output = run_tool_subprocess(
        "sh",
        &["-c".to_string(), "cat".to_string()],
        &input,
        Duration::from_secs(5),
        &no_cancel(),
    )
    .await
    .unwrap();

    let echoed: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(echoed, input);
}

#[tokio::test]
async fn nonzero_exit_carries_stderr() {
    let err = run_tool_subprocess(
        "sh",
        &["-c".to_string(), "echo index corrupt >&2; exit 3".to_string()],
        &json!({}),
        Duration::from_secs(5),
        &no_cancel(),
    )
    .await
    .unwrap_err();

    match err {
        SubprocessError::NonZeroExit { status, stderr } => {
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr, "index corrupt");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let err = run_tool_subprocess(
        "sleep",
        &["30".to_string()],
        &json!({}),
        Duration::from_millis(100),
        &no_cancel(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SubprocessError::Timeout { timeout_ms: 100 }));
}

#[tokio::test]
async fn cancellation_wins_over_the_running_child() {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = run_tool_subprocess(
        "sleep",
        &["30".to_string()],
        &json!({}),
        Duration::from_secs(30),
        &cancel,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SubprocessError::Cancelled));
}

#[tokio::test]
async fn missing_command_is_a_spawn_error() {
    let err = run_tool_subprocess(
        "/nonexistent/axle-tool",
        &[],
        &json!({}),
        Duration::from_secs(1),
        &no_cancel(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SubprocessError::Spawn { .. }));
}
