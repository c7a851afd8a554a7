//! Event fan-out specs: subscription laws and delivery isolation.

use crate::prelude::*;
use axle_core::SystemClock;
use axle_plugins::{BusError, DaemonConfig, EventBus, ProcessManager};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;

fn collect_lines(listener: UnixListener) -> mpsc::UnboundedReceiver<Value> {
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
async fn subscribe_unsubscribe_round_trip_is_identity() {
    let bus = EventBus::new(ProcessManager::new(SystemClock), SystemClock);
    let plugin = PluginName::new("indexer");

    assert!(bus.subscription(&plugin).is_none());
    bus.subscribe(
        plugin.clone(),
        PathBuf::from("/tmp/axle-specs-bus.sock"),
        &[EventKind::ToolCallStart, EventKind::TodoUpdate],
    )
    .unwrap();
    assert!(bus.subscription(&plugin).is_some());

    bus.unsubscribe(&plugin);
    assert!(bus.subscription(&plugin).is_none());

    // Unsubscribing an unknown plugin succeeds and changes nothing.
    bus.unsubscribe(&PluginName::new("never-subscribed"));
}

#[tokio::test]
async fn unapproved_subscription_leaves_the_registry_unchanged() {
    let bus = EventBus::new(ProcessManager::new(SystemClock), SystemClock);
    let plugin = PluginName::new("indexer");

    let err = bus
        .subscribe(
            plugin.clone(),
            PathBuf::from("/tmp/axle-specs-bus.sock"),
            &[EventKind::ToolCallStart, EventKind::ToolOutputChunk],
        )
        .unwrap_err();
    assert!(matches!(err, BusError::UnapprovedEvent(EventKind::ToolOutputChunk)));
    assert!(bus.subscription(&plugin).is_none());
}

#[tokio::test]
async fn dispatch_reaches_live_subscribers_and_skips_dead_ones() {
    let dir = tempfile::tempdir().unwrap();
    let live_socket = dir.path().join("live.sock");
    let dead_socket = dir.path().join("dead.sock");

    let manager = ProcessManager::new(SystemClock);
    let mut received = collect_lines(UnixListener::bind(&live_socket).unwrap());

    let mut config = DaemonConfig::new(PluginName::new("live"), "sleep", live_socket.clone());
    config.args = vec!["30".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    manager.start(config).await.unwrap();

    let bus = EventBus::new(manager.clone(), SystemClock);
    bus.subscribe(PluginName::new("live"), live_socket, &[EventKind::ToolCallStart]).unwrap();
    bus.subscribe(PluginName::new("dead"), dead_socket, &[EventKind::ToolCallStart]).unwrap();

    // Never raises, regardless of subscriber health.
    bus.dispatch(EventKind::ToolCallStart, json!({ "tool_name": "read", "id": "c1" }));

    let notification =
        tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap().unwrap();
    assert_eq!(notification["method"], json!("on_event"));
    assert_eq!(notification["params"]["event_type"], json!("TOOL_CALL_START"));
    assert_eq!(notification["params"]["event_data"]["tool_name"], json!("read"));
    assert!(notification.get("id").is_none(), "notifications carry no id");

    // Only the live subscriber heard anything.
    assert!(tokio::time::timeout(Duration::from_millis(200), received.recv()).await.is_err());

    manager.stop_all().await;
}

#[tokio::test]
async fn orchestrator_events_flow_through_the_bus_to_plugins() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("observer.sock");

    let manager = ProcessManager::new(SystemClock);
    let mut received = collect_lines(UnixListener::bind(&socket).unwrap());

    let mut config = DaemonConfig::new(PluginName::new("observer"), "sleep", socket.clone());
    config.args = vec!["30".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    manager.start(config).await.unwrap();

    let bus = EventBus::new(manager.clone(), SystemClock);
    bus.subscribe(
        PluginName::new("observer"),
        socket,
        &[EventKind::ToolCallStart, EventKind::ToolCallEnd],
    )
    .unwrap();

    let harness = Harness::builder()
        .tool(ToolDescriptor::read_only("read"), TestTool::ok("x"))
        .fanout(std::sync::Arc::new(bus))
        .build();
    harness.run(vec![call("c1", "read", json!({}))]).await.unwrap();

    let first =
        tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap().unwrap();
    assert_eq!(first["params"]["event_type"], json!("TOOL_CALL_START"));
    let second =
        tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap().unwrap();
    assert_eq!(second["params"]["event_type"], json!("TOOL_CALL_END"));

    manager.stop_all().await;
}
