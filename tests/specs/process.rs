//! Daemon lifecycle specs: start/stop round trips, the shutdown
//! interlock, and restart exhaustion.

use crate::prelude::*;
use axle_core::SystemClock;
use axle_plugins::{DaemonConfig, DaemonState, HealthConfig, ProcessManager, RestartConfig};
use tokio::net::UnixListener;

fn config(dir: &tempfile::TempDir, name: &str) -> DaemonConfig {
    let mut config =
        DaemonConfig::new(PluginName::new(name), "sleep", dir.path().join(format!("{name}.sock")));
    config.args = vec!["30".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    config.shutdown_grace = Duration::from_millis(500);
    config
}

#[tokio::test]
async fn lifecycle_round_trip_with_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, "indexer");
    let _listener = UnixListener::bind(&config.socket_path).unwrap();
    let manager = ProcessManager::new(SystemClock);
    let name = PluginName::new("indexer");

    manager.start(config.clone()).await.unwrap();
    assert_eq!(manager.state(&name), Some(DaemonState::Running));
    assert!(config.pid_path().exists(), "pid file written next to the socket");

    // stop on an already-stopped daemon is a no-op.
    manager.stop(&name).await.unwrap();
    manager.stop(&name).await.unwrap();
    assert_eq!(manager.state(&name), Some(DaemonState::Stopped));
    assert!(!config.pid_path().exists());
    assert!(!config.socket_path.exists());
}

#[tokio::test]
async fn stop_all_is_a_point_of_no_return() {
    let dir = tempfile::tempdir().unwrap();
    let first = config(&dir, "a");
    let _listener = UnixListener::bind(&first.socket_path).unwrap();
    let manager = ProcessManager::new(SystemClock);

    manager.start(first).await.unwrap();
    manager.stop_all().await;

    let err = manager.start(config(&dir, "b")).await.unwrap_err();
    assert!(err.to_string().contains("shutting down"), "{err}");
}

#[tokio::test]
async fn dead_daemon_exhausts_restarts_into_error() {
    let dir = tempfile::tempdir().unwrap();
    let name = PluginName::new("flaky");
    let mut config =
        DaemonConfig::new(name.clone(), "sh", dir.path().join("flaky.sock"));
    config.args = vec!["-c".to_string(), "sleep 1".to_string()];
    config.startup_timeout = Duration::from_millis(500);
    config.health = HealthConfig {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(100),
        max_failures: 3,
    };
    config.restart = RestartConfig { max_attempts: 1, delay: Duration::from_millis(50) };

    let _listener = UnixListener::bind(&config.socket_path).unwrap();
    let manager = ProcessManager::new(SystemClock);
    manager.start(config).await.unwrap();

    let errored = wait_for(Duration::from_secs(8), || {
        manager.state(&name) == Some(DaemonState::Error)
    })
    .await;
    assert!(errored, "restart budget should run out and stick in Error");
    let info = manager.info(&name).unwrap();
    assert_eq!(info.restart_attempts, 1);
}
