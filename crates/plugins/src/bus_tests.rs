// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::process::{DaemonConfig, ProcessManager};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;

fn bus() -> EventBus<SystemClock> {
    EventBus::new(ProcessManager::new(SystemClock), SystemClock)
}

fn name(s: &str) -> PluginName {
    PluginName::new(s)
}

const SOCKET: &str = "/tmp/axle-bus-test.sock";

#[test]
fn subscribe_rejects_empty_event_list() {
    let bus = bus();
    let err = bus.subscribe(name("p"), PathBuf::from(SOCKET), &[]).unwrap_err();
    assert!(matches!(err, BusError::EmptyEvents));
    assert!(bus.subscription(&name("p")).is_none());
}

#[yare::parameterized(
    output_chunk = { EventKind::ToolOutputChunk },
    exec_start   = { EventKind::ToolExecutionStart },
    form_request = { EventKind::ToolFormRequest },
    error        = { EventKind::Error },
)]
fn subscribe_rejects_unapproved_events(unapproved: EventKind) {
    let bus = bus();
    let events = [EventKind::ToolCallStart, unapproved];
    let err = bus.subscribe(name("p"), PathBuf::from(SOCKET), &events).unwrap_err();
    assert!(matches!(err, BusError::UnapprovedEvent(e) if e == unapproved));
    // A rejected subscribe leaves the map unchanged.
    assert!(bus.subscription(&name("p")).is_none());
}

#[test]
fn subscribe_rejects_relative_socket_path() {
    let bus = bus();
    let err = bus
        .subscribe(name("p"), PathBuf::from("plugin.sock"), &[EventKind::ToolCallStart])
        .unwrap_err();
    assert!(matches!(err, BusError::Socket(_)));
}

#[tokio::test]
async fn subscribe_deduplicates_and_replaces() {
    let bus = bus();
    bus.subscribe(
        name("p"),
        PathBuf::from(SOCKET),
        &[EventKind::ToolCallStart, EventKind::ToolCallStart, EventKind::ToolCallEnd],
    )
    .unwrap();
    let sub = bus.subscription(&name("p")).unwrap();
    assert_eq!(sub.events.len(), 2);

    bus.subscribe(name("p"), PathBuf::from(SOCKET), &[EventKind::TodoUpdate]).unwrap();
    let sub = bus.subscription(&name("p")).unwrap();
    assert_eq!(sub.events.len(), 1);
    assert!(sub.events.contains(&EventKind::TodoUpdate));
}

#[tokio::test]
async fn unsubscribe_roundtrip_and_idempotence() {
    let bus = bus();
    bus.subscribe(name("p"), PathBuf::from(SOCKET), &[EventKind::AgentStart]).unwrap();
    bus.unsubscribe(&name("p"));
    assert!(bus.subscription(&name("p")).is_none());

    // Unknown plugin: a no-op.
    bus.unsubscribe(&name("p"));
    bus.unsubscribe(&name("never-subscribed"));
}

/// Accept connections and forward every received notification line.
/// Readiness/health probes connect without writing; those produce no line.
fn collect_notifications(listener: UnixListener) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stream).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(value) = serde_json::from_str::<Value>(&line) {
                        let _ = tx.send(value);
                    }
                }
            });
        }
    });
    rx
}

#[tokio::test]
async fn dispatch_delivers_to_running_subscriber_and_skips_dead_one() {
    let dir = tempfile::tempdir().unwrap();
    let alive_socket = dir.path().join("alive.sock");
    let dead_socket = dir.path().join("dead.sock");

    let manager = ProcessManager::new(SystemClock);
    let listener = UnixListener::bind(&alive_socket).unwrap();
    let mut received = collect_notifications(listener);

    let mut config = DaemonConfig::new(name("alive"), "sleep", alive_socket.clone());
    config.args = vec!["30".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    manager.start(config).await.unwrap();

    let bus = EventBus::new(manager.clone(), SystemClock);
    bus.subscribe(name("alive"), alive_socket, &[EventKind::ToolCallStart]).unwrap();
    // Dead subscriber: registered on the bus but its daemon never started.
    bus.subscribe(name("dead"), dead_socket, &[EventKind::ToolCallStart]).unwrap();

    bus.dispatch(EventKind::ToolCallStart, json!({ "tool_name": "read" }));

    let notification =
        tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap().unwrap();
    assert_eq!(notification["jsonrpc"], json!("2.0"));
    assert_eq!(notification["method"], json!("on_event"));
    assert!(notification.get("id").is_none());
    assert_eq!(notification["params"]["event_type"], json!("TOOL_CALL_START"));
    assert_eq!(notification["params"]["event_data"]["tool_name"], json!("read"));
    assert!(notification["params"]["timestamp"].is_u64());

    // Nothing else arrives; the dead subscriber was skipped silently.
    assert!(tokio::time::timeout(Duration::from_millis(200), received.recv()).await.is_err());

    manager.stop_all().await;
}

#[tokio::test]
async fn dispatch_ignores_subscribers_of_other_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("a.sock");
    let manager = ProcessManager::new(SystemClock);
    let listener = UnixListener::bind(&socket).unwrap();
    let mut received = collect_notifications(listener);

    let mut config = DaemonConfig::new(name("a"), "sleep", socket.clone());
    config.args = vec!["30".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    manager.start(config).await.unwrap();

    let bus = EventBus::new(manager.clone(), SystemClock);
    bus.subscribe(name("a"), socket, &[EventKind::TodoUpdate]).unwrap();

    bus.dispatch(EventKind::ToolCallStart, json!({}));
    assert!(tokio::time::timeout(Duration::from_millis(200), received.recv()).await.is_err());

    manager.stop_all().await;
}
