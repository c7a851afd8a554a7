// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: spawn, readiness, health, restart, stop.
//!
//! Each plugin daemon is tracked by a [`DaemonRecord`] walking
//! `Starting → Running → Stopping → Stopped` (or `Error`). Readiness and
//! health are both defined by the daemon's socket accepting a connection;
//! the supervisor never parses daemon output.

use axle_core::{Clock, PluginName, SystemClock};
use axle_rpc::{validate_socket_path, RpcError};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How often readiness is re-probed during startup.
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connect deadline for a single readiness probe.
const READINESS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of one daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl DaemonState {
    /// Terminal states permit a fresh `start`.
    pub fn is_terminal(self) -> bool {
        matches!(self, DaemonState::Stopped | DaemonState::Error)
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
            DaemonState::Stopped => "stopped",
            DaemonState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Socket health-check policy.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive failures before the daemon is declared unhealthy.
    pub max_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_failures: 3,
        }
    }
}

/// Restart policy for unhealthy or dead daemons.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(1) }
    }
}

/// Everything needed to run one daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub plugin: PluginName,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub socket_path: PathBuf,
    pub startup_timeout: Duration,
    pub shutdown_grace: Duration,
    pub health: HealthConfig,
    pub restart: RestartConfig,
}

impl DaemonConfig {
    pub fn new(plugin: PluginName, command: impl Into<String>, socket_path: PathBuf) -> Self {
        Self {
            plugin,
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            socket_path,
            startup_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            health: HealthConfig::default(),
            restart: RestartConfig::default(),
        }
    }

    /// PID file lives next to the socket.
    pub fn pid_path(&self) -> PathBuf {
        self.socket_path.with_extension("pid")
    }
}

/// Read-only snapshot of a daemon record.
///
/// The OS process handle never leaves the manager.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    pub plugin: PluginName,
    pub state: DaemonState,
    pub pid: Option<u32>,
    pub socket_path: PathBuf,
    pub health_failures: u32,
    pub restart_attempts: u32,
    pub last_transition_ms: u64,
    pub last_error: Option<String>,
}

/// Lifecycle errors surfaced to the caller of `start`/`stop`.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("daemon {0} already exists in state {1}")]
    AlreadyRunning(PluginName, DaemonState),

    #[error("manager is shutting down; new daemon starts are rejected")]
    ShuttingDown,

    #[error("failed to spawn daemon {plugin}: {source}")]
    Spawn {
        plugin: PluginName,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon {plugin} not ready after {waited_ms}ms: {detail}")]
    StartupTimeout { plugin: PluginName, waited_ms: u64, detail: String },

    #[error(transparent)]
    Socket(#[from] RpcError),

    #[error("failed to force-kill daemon {plugin}: {source}")]
    ForceKill {
        plugin: PluginName,
        #[source]
        source: std::io::Error,
    },
}

struct DaemonRecord {
    config: DaemonConfig,
    state: DaemonState,
    child: Option<Child>,
    pid: Option<u32>,
    health_failures: u32,
    restart_attempts: u32,
    last_transition_ms: u64,
    last_error: Option<String>,
    health_task: Option<tokio::task::JoinHandle<()>>,
    /// Incarnation counter: background tasks from an older start must not
    /// act on a record that has since been restarted by hand.
    epoch: u64,
}

impl DaemonRecord {
    fn starting(config: DaemonConfig, epoch: u64, now_ms: u64) -> Self {
        Self {
            config,
            state: DaemonState::Starting,
            child: None,
            pid: None,
            health_failures: 0,
            restart_attempts: 0,
            last_transition_ms: now_ms,
            last_error: None,
            health_task: None,
            epoch,
        }
    }

    fn info(&self) -> DaemonInfo {
        DaemonInfo {
            plugin: self.config.plugin.clone(),
            state: self.state,
            pid: self.pid,
            socket_path: self.config.socket_path.clone(),
            health_failures: self.health_failures,
            restart_attempts: self.restart_attempts,
            last_transition_ms: self.last_transition_ms,
            last_error: self.last_error.clone(),
        }
    }
}

struct Inner<C: Clock> {
    records: Mutex<HashMap<PluginName, DaemonRecord>>,
    client: axle_rpc::RpcClient,
    clock: C,
    shutting_down: AtomicBool,
}

/// Supervisor for plugin daemons.
///
/// Cheap to clone; all clones share one record map. Locks are only held
/// for map access, never across socket or process waits.
pub struct ProcessManager<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for ProcessManager<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl Default for ProcessManager<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> ProcessManager<C> {
    pub fn new(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                client: axle_rpc::RpcClient::new(),
                clock,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn a daemon and wait for its socket to accept a connection.
    ///
    /// Rejects if a record for the plugin exists in a non-terminal state,
    /// or after `stop_all` has run. On readiness failure the child is
    /// killed and the record lands in `Error`.
    pub async fn start(&self, config: DaemonConfig) -> Result<(), ProcessError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ProcessError::ShuttingDown);
        }
        validate_socket_path(&config.socket_path)?;

        let plugin = config.plugin.clone();
        let epoch = {
            let mut records = self.inner.records.lock();
            if let Some(existing) = records.get(plugin.as_str()) {
                if !existing.state.is_terminal() {
                    return Err(ProcessError::AlreadyRunning(plugin, existing.state));
                }
            }
            let epoch = records.get(plugin.as_str()).map_or(0, |r| r.epoch + 1);
            records.insert(
                plugin.clone(),
                DaemonRecord::starting(config.clone(), epoch, self.inner.clock.epoch_ms()),
            );
            epoch
        };

        match self.spawn_ready(&config).await {
            Ok((child, pid)) => {
                write_pid_file(&config, pid);
                {
                    let mut records = self.inner.records.lock();
                    if let Some(record) = records.get_mut(plugin.as_str()) {
                        record.state = DaemonState::Running;
                        record.child = Some(child);
                        record.pid = Some(pid);
                        record.health_failures = 0;
                        record.restart_attempts = 0;
                        record.last_error = None;
                        record.last_transition_ms = self.inner.clock.epoch_ms();
                    }
                }
                self.spawn_health_task(plugin.clone(), epoch);
                info!(plugin = %plugin, pid, socket = %config.socket_path.display(), "daemon running");
                Ok(())
            }
            Err(e) => {
                let mut records = self.inner.records.lock();
                if let Some(record) = records.get_mut(plugin.as_str()) {
                    record.state = DaemonState::Error;
                    record.last_error = Some(e.to_string());
                    record.last_transition_ms = self.inner.clock.epoch_ms();
                }
                Err(e)
            }
        }
    }

    /// Gracefully stop a daemon: SIGTERM, wait out the grace period, then
    /// force-kill. Removes the PID and socket files. A no-op for unknown
    /// or already-stopped daemons.
    pub async fn stop(&self, plugin: &PluginName) -> Result<(), ProcessError> {
        let (child, config, health_task, pid) = {
            let mut records = self.inner.records.lock();
            let Some(record) = records.get_mut(plugin.as_str()) else {
                return Ok(());
            };
            if record.state == DaemonState::Stopped {
                return Ok(());
            }
            record.state = DaemonState::Stopping;
            record.last_transition_ms = self.inner.clock.epoch_ms();
            (record.child.take(), record.config.clone(), record.health_task.take(), record.pid.take())
        };

        if let Some(task) = health_task {
            task.abort();
        }
        if let Some(pid) = pid {
            // Termination signal first; the child gets the grace period to
            // flush and remove its socket.
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        let mut force_kill_error = None;
        if let Some(mut child) = child {
            match tokio::time::timeout(config.shutdown_grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(plugin = %plugin, grace_ms = config.shutdown_grace.as_millis() as u64,
                        "daemon ignored SIGTERM, force-killing");
                    if let Err(e) = child.kill().await {
                        force_kill_error = Some(e);
                    }
                }
            }
        }

        let _ = std::fs::remove_file(config.pid_path());
        let _ = std::fs::remove_file(&config.socket_path);

        let mut records = self.inner.records.lock();
        if let Some(record) = records.get_mut(plugin.as_str()) {
            record.last_transition_ms = self.inner.clock.epoch_ms();
            match force_kill_error {
                Some(e) => {
                    record.state = DaemonState::Error;
                    record.last_error = Some(format!("force-kill failed: {e}"));
                    return Err(ProcessError::ForceKill { plugin: plugin.clone(), source: e });
                }
                None => {
                    record.state = DaemonState::Stopped;
                }
            }
        }
        info!(plugin = %plugin, "daemon stopped");
        Ok(())
    }

    /// Stop every daemon in parallel, ignoring per-daemon failures, and
    /// refuse all starts from here on.
    pub async fn stop_all(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let names: Vec<PluginName> = self.inner.records.lock().keys().cloned().collect();

        let mut tasks = tokio::task::JoinSet::new();
        for name in names {
            let manager = self.clone();
            tasks.spawn(async move {
                if let Err(e) = manager.stop(&name).await {
                    warn!(plugin = %name, error = %e, "stop failed during shutdown");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    pub fn is_running(&self, plugin: &PluginName) -> bool {
        self.state(plugin) == Some(DaemonState::Running)
    }

    pub fn state(&self, plugin: &PluginName) -> Option<DaemonState> {
        self.inner.records.lock().get(plugin.as_str()).map(|r| r.state)
    }

    pub fn pid(&self, plugin: &PluginName) -> Option<u32> {
        self.inner.records.lock().get(plugin.as_str()).and_then(|r| r.pid)
    }

    /// Snapshot of one record.
    pub fn info(&self, plugin: &PluginName) -> Option<DaemonInfo> {
        self.inner.records.lock().get(plugin.as_str()).map(DaemonRecord::info)
    }

    /// Spawn the child and poll until its socket accepts a connection.
    async fn spawn_ready(&self, config: &DaemonConfig) -> Result<(Child, u32), ProcessError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|source| ProcessError::Spawn { plugin: config.plugin.clone(), source })?;
        let Some(pid) = child.id() else {
            return Err(ProcessError::Spawn {
                plugin: config.plugin.clone(),
                source: std::io::Error::other("spawned child has no pid"),
            });
        };

        let started = tokio::time::Instant::now();
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ProcessError::StartupTimeout {
                    plugin: config.plugin.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                    detail: format!("daemon exited during startup ({status})"),
                });
            }

            if config.socket_path.exists()
                && self
                    .inner
                    .client
                    .ping(&config.socket_path, Some(READINESS_PROBE_TIMEOUT))
                    .await
                    .is_ok()
            {
                return Ok((child, pid));
            }

            if started.elapsed() >= config.startup_timeout {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ProcessError::StartupTimeout {
                    plugin: config.plugin.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                    detail: "socket never accepted a connection".to_string(),
                });
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// Periodic liveness probe: child exit or `max_failures` consecutive
    /// failed connects schedule a restart.
    fn spawn_health_task(&self, plugin: PluginName, epoch: u64) {
        let manager = self.clone();
        let task_plugin = plugin.clone();
        let handle = tokio::spawn(async move {
            let plugin = task_plugin;
            let Some((interval, timeout, max_failures, socket)) = ({
                let records = manager.inner.records.lock();
                records.get(plugin.as_str()).map(|r| {
                    (
                        r.config.health.interval,
                        r.config.health.timeout,
                        r.config.health.max_failures,
                        r.config.socket_path.clone(),
                    )
                })
            }) else {
                return;
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick, already probed by readiness
            loop {
                ticker.tick().await;
                if manager.inner.shutting_down.load(Ordering::SeqCst) {
                    return;
                }

                let exited = {
                    let mut records = manager.inner.records.lock();
                    let Some(record) = records.get_mut(plugin.as_str()) else { return };
                    if record.epoch != epoch || record.state != DaemonState::Running {
                        return;
                    }
                    record.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
                };
                if let Some(status) = exited {
                    warn!(plugin = %plugin, %status, "daemon exited unexpectedly");
                    manager.schedule_restart(
                        plugin.clone(),
                        epoch,
                        format!("daemon exited unexpectedly ({status})"),
                    );
                    return;
                }

                match manager.inner.client.ping(&socket, Some(timeout)).await {
                    Ok(()) => {
                        let mut records = manager.inner.records.lock();
                        if let Some(record) = records.get_mut(plugin.as_str()) {
                            if record.epoch == epoch {
                                record.health_failures = 0;
                            }
                        }
                    }
                    Err(e) => {
                        let failures = {
                            let mut records = manager.inner.records.lock();
                            let Some(record) = records.get_mut(plugin.as_str()) else { return };
                            if record.epoch != epoch || record.state != DaemonState::Running {
                                return;
                            }
                            record.health_failures += 1;
                            record.health_failures
                        };
                        debug!(plugin = %plugin, failures, error = %e, "health check failed");
                        if failures >= max_failures {
                            manager.schedule_restart(
                                plugin.clone(),
                                epoch,
                                format!("{failures} consecutive health-check failures"),
                            );
                            return;
                        }
                    }
                }
            }
        });

        let mut records = self.inner.records.lock();
        if let Some(record) = records.get_mut(plugin.as_str()) {
            record.health_task = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Move a running record into `Starting` and kick off the restart loop.
    fn schedule_restart(&self, plugin: PluginName, epoch: u64, reason: String) {
        {
            let mut records = self.inner.records.lock();
            let Some(record) = records.get_mut(plugin.as_str()) else { return };
            if record.epoch != epoch || record.state != DaemonState::Running {
                return;
            }
            record.state = DaemonState::Starting;
            record.last_error = Some(reason.clone());
            record.last_transition_ms = self.inner.clock.epoch_ms();
            record.health_failures = 0;
            // kill_on_drop reaps a live-but-unhealthy child here
            record.child = None;
            record.pid = None;
        }
        warn!(plugin = %plugin, reason = %reason, "daemon restart scheduled");

        let manager = self.clone();
        tokio::spawn(async move {
            manager.restart_loop(plugin, epoch).await;
        });
    }

    async fn restart_loop(&self, plugin: PluginName, epoch: u64) {
        loop {
            let decision = {
                let mut records = self.inner.records.lock();
                let Some(record) = records.get_mut(plugin.as_str()) else { return };
                if record.epoch != epoch || record.state != DaemonState::Starting {
                    return;
                }
                if record.restart_attempts >= record.config.restart.max_attempts {
                    let prior = record.last_error.take().unwrap_or_else(|| "unknown".to_string());
                    record.state = DaemonState::Error;
                    record.last_error = Some(format!(
                        "restart attempts exhausted ({}); last error: {prior}",
                        record.config.restart.max_attempts,
                    ));
                    record.last_transition_ms = self.inner.clock.epoch_ms();
                    None
                } else {
                    record.restart_attempts += 1;
                    Some((record.config.clone(), record.restart_attempts))
                }
            };
            let Some((config, attempt)) = decision else {
                warn!(plugin = %plugin, "daemon stuck in error state");
                return;
            };

            tokio::time::sleep(config.restart.delay).await;
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                let mut records = self.inner.records.lock();
                if let Some(record) = records.get_mut(plugin.as_str()) {
                    if record.epoch == epoch {
                        record.state = DaemonState::Stopped;
                    }
                }
                return;
            }

            info!(plugin = %plugin, attempt, "restarting daemon");
            match self.spawn_ready(&config).await {
                Ok((child, pid)) => {
                    write_pid_file(&config, pid);
                    {
                        let mut records = self.inner.records.lock();
                        let Some(record) = records.get_mut(plugin.as_str()) else { return };
                        if record.epoch != epoch {
                            // A newer incarnation took over while we spawned.
                            drop(records);
                            let mut child = child;
                            let _ = child.start_kill();
                            return;
                        }
                        record.state = DaemonState::Running;
                        record.child = Some(child);
                        record.pid = Some(pid);
                        record.last_transition_ms = self.inner.clock.epoch_ms();
                    }
                    self.spawn_health_task(plugin.clone(), epoch);
                    info!(plugin = %plugin, pid, attempt, "daemon restarted");
                    return;
                }
                Err(e) => {
                    warn!(plugin = %plugin, attempt, error = %e, "restart attempt failed");
                    let mut records = self.inner.records.lock();
                    if let Some(record) = records.get_mut(plugin.as_str()) {
                        if record.epoch == epoch {
                            record.last_error = Some(e.to_string());
                        }
                    }
                }
            }
        }
    }
}

fn write_pid_file(config: &DaemonConfig, pid: u32) {
    if let Err(e) = std::fs::write(config.pid_path(), pid.to_string()) {
        warn!(plugin = %config.plugin, path = %config.pid_path().display(), error = %e,
            "failed to write pid file");
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
