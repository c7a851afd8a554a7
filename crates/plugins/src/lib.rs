// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin subsystem: manifests, daemon lifecycle, and event fan-out.
//!
//! Plugins extend the tool catalog with out-of-process providers, either
//! stateless per-call executables or long-lived local daemons reachable
//! via JSON-RPC 2.0 over Unix-domain sockets.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod bus;
mod manifest;
mod process;
mod subprocess;

pub use bus::{BusError, EventBus, Subscription};
pub use manifest::{
    parse_duration, ActivationMode, AgentDef, BackgroundDef, Communication, HealthDef,
    ManifestError, PluginManifest, ToolBackendDef, ToolDef,
};
pub use process::{
    DaemonConfig, DaemonInfo, DaemonState, HealthConfig, ProcessError, ProcessManager,
    RestartConfig,
};
pub use subprocess::{run_tool_subprocess, SubprocessError, DEFAULT_SUBPROCESS_TIMEOUT};
