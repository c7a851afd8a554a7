//! Daemon-backed tool specs: RPC failures surface as tool errors, never
//! as crashes, and the turn keeps going.

use crate::prelude::*;
use axle_core::ErrorKind;
use axle_orchestrator::ToolBackend;
use axle_plugins::{DaemonConfig, DaemonState, ProcessManager};
use axle_core::SystemClock;
use serde_json::json;
use std::sync::Arc;
use tokio::net::UnixListener;

fn daemon_tool(plugin: &str, timeout: Duration) -> (ToolDescriptor, ToolBackend) {
    (
        ToolDescriptor::destructive("symbol_search").with_confirmation(false),
        ToolBackend::DaemonRpc {
            plugin: PluginName::new(plugin),
            method: "index/search".to_string(),
            timeout: Some(timeout),
        },
    )
}

#[tokio::test]
async fn rpc_timeout_maps_to_system_error_and_processing_continues() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("indexer.sock");

    // The daemon accepts connections but never writes a byte.
    let _listener = UnixListener::bind(&socket).unwrap();

    let manager = ProcessManager::new(SystemClock);
    let mut config = DaemonConfig::new(PluginName::new("indexer"), "sleep", socket);
    config.args = vec!["30".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    manager.start(config).await.unwrap();

    let (descriptor, backend) = daemon_tool("indexer", Duration::from_millis(200));
    let harness = Harness::builder()
        .backend(descriptor, backend)
        .daemons(Arc::new(manager.clone()))
        .tool(ToolDescriptor::read_only("read"), TestTool::ok("still fine"))
        .sequential_only()
        .build();

    let results = harness
        .run(vec![
            call("c1", "symbol_search", json!({ "query": "main" })),
            call("c2", "read", json!({})),
        ])
        .await
        .unwrap();

    assert_eq!(results[0].error_kind(), Some(ErrorKind::SystemError));
    let message = &results[0].error.as_ref().unwrap().message;
    assert!(message.contains("timeout"), "{message}");

    // The call still closed out its event pair, and the next tool ran.
    assert_eq!(
        harness.activity.kinds_for("c1"),
        [EventKind::ToolCallStart, EventKind::ToolExecutionStart, EventKind::ToolCallEnd]
    );
    assert!(results[1].success);

    manager.stop_all().await;
}

#[tokio::test]
async fn missing_daemon_surfaces_not_running_with_manager_state() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("indexer.sock");
    let plugin = PluginName::new("indexer");

    let manager = ProcessManager::new(SystemClock);
    {
        let _listener = UnixListener::bind(&socket).unwrap();
        let mut config = DaemonConfig::new(plugin.clone(), "sleep", socket.clone());
        config.args = vec!["30".to_string()];
        config.startup_timeout = Duration::from_millis(500);
        manager.start(config).await.unwrap();
    }
    // Stop removes the socket file; the daemon is gone.
    manager.stop(&plugin).await.unwrap();
    assert!(!socket.exists());
    assert_eq!(manager.state(&plugin), Some(DaemonState::Stopped));

    let (descriptor, backend) = daemon_tool("indexer", Duration::from_millis(200));
    let harness = Harness::builder()
        .backend(descriptor, backend)
        .daemons(Arc::new(manager.clone()))
        .build();

    let results =
        harness.run(vec![call("c1", "symbol_search", json!({}))]).await.unwrap();
    assert_eq!(results[0].error_kind(), Some(ErrorKind::SystemError));
    let message = &results[0].error.as_ref().unwrap().message;
    assert!(message.contains("is not running"), "{message}");
    assert!(message.contains("stopped"), "{message}");
}
