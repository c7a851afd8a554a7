// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uniform call surface over in-process, subprocess-per-call, and
//! daemon-RPC tools.
//!
//! The registry adapter owns descriptors and backend routing; tool
//! *implementations* stay external. Visibility restrictions are enforced
//! here, before any backend is touched.

use async_trait::async_trait;
use axle_core::{
    CallId, DisplayFlags, ErrorKind, PluginName, ToolCall, ToolDescriptor, ToolResult,
};
use axle_plugins::{
    run_tool_subprocess, DaemonState, PluginManifest, ProcessManager, SubprocessError,
    ToolBackendDef, DEFAULT_SUBPROCESS_TIMEOUT,
};
use axle_rpc::RpcClient;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The transparent wrapper tool. Valid batches are unwrapped before
/// dispatch; only malformed ones reach the registry handler.
pub const BATCH_TOOL: &str = "batch";

/// Execution context handed to a tool implementation.
pub struct ToolContext<'a> {
    pub call_id: &'a CallId,
    /// Turn-scoped abort signal (or the group child token).
    pub cancel: CancellationToken,
    pub agent_name: &'a str,
    /// Scoped registry for nested agent delegation.
    pub registry: &'a RegistryAdapter,
}

/// Failure modes a tool implementation may raise.
///
/// The registry maps these onto result error kinds: directory traversal
/// becomes `permission_denied`, interruption becomes `interrupted`, and
/// everything else becomes `system_error`.
#[derive(Debug, Clone, Error)]
pub enum ToolExecError {
    #[error("path escapes the permitted root: {0}")]
    DirectoryTraversal(String),

    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

/// An in-process tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Attach UI previews (diff widgets) to the record that the start
    /// event just created. Optional.
    async fn preview(&self, _args: &Map<String, Value>, _call_id: &CallId) {}

    /// Pre-permission validation for confirmation-gated tools. Optional.
    async fn validate(&self, _args: &Map<String, Value>) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: ToolContext<'_>,
    ) -> Result<ToolResult, ToolExecError>;
}

/// Probe into the daemon supervisor, as the registry sees it.
pub trait DaemonProbe: Send + Sync {
    fn is_running(&self, plugin: &PluginName) -> bool;
    fn state(&self, plugin: &PluginName) -> Option<DaemonState>;
    fn socket_path(&self, plugin: &PluginName) -> Option<PathBuf>;
}

impl<C: axle_core::Clock> DaemonProbe for ProcessManager<C> {
    fn is_running(&self, plugin: &PluginName) -> bool {
        ProcessManager::is_running(self, plugin)
    }

    fn state(&self, plugin: &PluginName) -> Option<DaemonState> {
        ProcessManager::state(self, plugin)
    }

    fn socket_path(&self, plugin: &PluginName) -> Option<PathBuf> {
        self.info(plugin).map(|info| info.socket_path)
    }
}

/// How a registered tool reaches its implementation.
pub enum ToolBackend {
    InProcess(Arc<dyn Tool>),
    Subprocess { command: String, args: Vec<String>, timeout: Duration },
    DaemonRpc { plugin: PluginName, method: String, timeout: Option<Duration> },
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    backend: ToolBackend,
}

/// Registry adapter: one `execute` surface over every backend variant.
pub struct RegistryAdapter {
    tools: HashMap<String, RegisteredTool>,
    daemons: Option<Arc<dyn DaemonProbe>>,
    rpc: RpcClient,
}

impl Default for RegistryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAdapter {
    pub fn new() -> Self {
        let mut adapter =
            Self { tools: HashMap::new(), daemons: None, rpc: RpcClient::new() };
        // The batch wrapper is always present and renders transparently.
        adapter.register(
            ToolDescriptor::read_only(BATCH_TOOL).with_display(DisplayFlags {
                visible_in_chat: true,
                transparent: true,
                ..DisplayFlags::default()
            }),
            ToolBackend::InProcess(Arc::new(BatchHandler)),
        );
        adapter
    }

    /// Attach the daemon supervisor used by `background_rpc` tools.
    pub fn with_daemons(mut self, daemons: Arc<dyn DaemonProbe>) -> Self {
        self.daemons = Some(daemons);
        self
    }

    pub fn register(&mut self, descriptor: ToolDescriptor, backend: ToolBackend) {
        let name = descriptor.name.clone();
        self.tools.insert(name, RegisteredTool { descriptor, backend });
    }

    /// Wire a plugin manifest's tool definitions to their backends.
    ///
    /// Plugin tools enter the catalog as sequential-only: the manifest has
    /// no safety declaration, so nothing plugin-provided joins the
    /// safe-concurrent set.
    pub fn register_manifest(&mut self, manifest: &PluginManifest) {
        let plugin = manifest.plugin_name();
        for def in &manifest.tools {
            let descriptor =
                ToolDescriptor::destructive(&def.name).with_confirmation(false).with_plugin(plugin.clone());
            let backend = match &def.backend {
                ToolBackendDef::BackgroundRpc { method } => ToolBackend::DaemonRpc {
                    plugin: plugin.clone(),
                    method: method.clone(),
                    timeout: None,
                },
                ToolBackendDef::Subprocess { command, args } => ToolBackend::Subprocess {
                    command: command.clone(),
                    args: args.clone(),
                    timeout: DEFAULT_SUBPROCESS_TIMEOUT,
                },
            };
            self.register(descriptor, backend);
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    /// Display flags with a sane default for unknown tools.
    pub fn display_flags(&self, name: &str) -> DisplayFlags {
        self.descriptor(name).map_or(
            DisplayFlags { visible_in_chat: true, ..DisplayFlags::default() },
            |d| d.display,
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Run the tool's preview hook, if it has one.
    pub async fn preview(&self, call: &ToolCall) {
        if let Some(RegisteredTool { backend: ToolBackend::InProcess(tool), .. }) =
            self.tools.get(&call.name)
        {
            tool.preview(&call.arguments, &call.id).await;
        }
    }

    /// Run the tool's pre-permission validation hook.
    pub async fn validate(&self, call: &ToolCall) -> Result<(), String> {
        match self.tools.get(&call.name) {
            Some(RegisteredTool { backend: ToolBackend::InProcess(tool), .. }) => {
                tool.validate(&call.arguments).await
            }
            _ => Ok(()),
        }
    }

    /// Execute one call against its backend.
    ///
    /// Tool-level failures come back as error results, never as `Err`:
    /// nothing a tool does may crash the turn.
    pub async fn execute(
        &self,
        call: &ToolCall,
        cancel: CancellationToken,
        agent_name: &str,
    ) -> ToolResult {
        let Some(registered) = self.tools.get(&call.name) else {
            return ToolResult::fail_with(
                ErrorKind::ValidationError,
                format!("Unknown tool: {}", call.name),
                &call.name,
                call.arguments.clone(),
            );
        };

        // Visibility is enforced before the backend is ever touched.
        if !registered.descriptor.visible_to_agent(agent_name) {
            return ToolResult::fail_with(
                ErrorKind::PermissionError,
                format!("Tool {} is not available to agent {}", call.name, agent_name),
                &call.name,
                call.arguments.clone(),
            );
        }

        debug!(tool = %call.name, call_id = %call.id, "executing");
        match &registered.backend {
            ToolBackend::InProcess(tool) => {
                let ctx = ToolContext {
                    call_id: &call.id,
                    cancel: cancel.clone(),
                    agent_name,
                    registry: self,
                };
                let outcome = tokio::select! {
                    outcome = tool.execute(call.arguments.clone(), ctx) => outcome,
                    () = cancel.cancelled() => Err(ToolExecError::Interrupted),
                };
                match outcome {
                    Ok(result) => result,
                    Err(e) => {
                        let kind = match &e {
                            ToolExecError::DirectoryTraversal(_) => ErrorKind::PermissionDenied,
                            ToolExecError::Interrupted => ErrorKind::Interrupted,
                            ToolExecError::Other(_) => ErrorKind::SystemError,
                        };
                        ToolResult::fail_with(
                            kind,
                            e.to_string(),
                            &call.name,
                            call.arguments.clone(),
                        )
                    }
                }
            }

            ToolBackend::Subprocess { command, args, timeout } => {
                let input = Value::Object(call.arguments.clone());
                match run_tool_subprocess(command, args, &input, *timeout, &cancel).await {
                    Ok(stdout) => ToolResult::ok(stdout),
                    Err(SubprocessError::Cancelled) => ToolResult::fail_with(
                        ErrorKind::Interrupted,
                        "interrupted",
                        &call.name,
                        call.arguments.clone(),
                    ),
                    Err(e) => ToolResult::fail_with(
                        ErrorKind::SystemError,
                        e.to_string(),
                        &call.name,
                        call.arguments.clone(),
                    ),
                }
            }

            ToolBackend::DaemonRpc { plugin, method, timeout } => {
                self.execute_daemon_rpc(call, plugin, method, *timeout, cancel).await
            }
        }
    }

    async fn execute_daemon_rpc(
        &self,
        call: &ToolCall,
        plugin: &PluginName,
        method: &str,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(daemons) = &self.daemons else {
            return ToolResult::fail_with(
                ErrorKind::SystemError,
                format!("daemon {plugin} is not running: no daemon supervisor attached"),
                &call.name,
                call.arguments.clone(),
            );
        };
        if !daemons.is_running(plugin) {
            let state = daemons
                .state(plugin)
                .map_or_else(|| "never started".to_string(), |s| s.to_string());
            return ToolResult::fail_with(
                ErrorKind::SystemError,
                format!("daemon {plugin} is not running (state: {state})"),
                &call.name,
                call.arguments.clone(),
            );
        }
        let Some(socket) = daemons.socket_path(plugin) else {
            return ToolResult::fail_with(
                ErrorKind::SystemError,
                format!("daemon {plugin} is not running: socket unknown"),
                &call.name,
                call.arguments.clone(),
            );
        };

        let params = json!({
            "tool": call.name,
            "call_id": call.id,
            "arguments": call.arguments,
        });
        let outcome = tokio::select! {
            outcome = self.rpc.call(&socket, method, Some(params), timeout) => outcome,
            () = cancel.cancelled() => {
                return ToolResult::fail_with(
                    ErrorKind::Interrupted,
                    "interrupted",
                    &call.name,
                    call.arguments.clone(),
                );
            }
        };

        match outcome {
            Ok(Value::String(text)) => ToolResult::ok(text),
            Ok(other) => ToolResult::ok(other.to_string()),
            Err(e) => ToolResult::fail_with(
                ErrorKind::SystemError,
                format!("daemon {plugin} call failed (daemon may not be running): {e}"),
                &call.name,
                call.arguments.clone(),
            ),
        }
    }
}

/// Authoritative error source for malformed batch calls. Valid batches
/// never reach this handler; the orchestrator unwraps them first.
struct BatchHandler;

#[async_trait]
impl Tool for BatchHandler {
    async fn execute(
        &self,
        args: Map<String, Value>,
        _ctx: ToolContext<'_>,
    ) -> Result<ToolResult, ToolExecError> {
        let detail = match args.get("tools") {
            None => "missing 'tools'",
            Some(Value::Array(tools)) if tools.is_empty() => "'tools' is empty",
            Some(Value::Array(_)) => {
                "'tools' must hold at most 32 entries, each with a string 'name' and an object 'arguments'"
            }
            Some(_) => "'tools' is not an array",
        };
        Ok(ToolResult::fail_with(
            ErrorKind::ValidationError,
            format!("Invalid batch call: {detail}"),
            BATCH_TOOL,
            args,
        ))
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
