// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-turn tool orchestration: concurrency policy, permission gating,
//! lifecycle events, reminder assembly, and result post-processing.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod context;
mod postprocess;
mod registry;
pub mod reminders;
mod turn;

#[cfg(any(test, feature = "test-support"))]
pub mod support;

pub use context::{
    ActivitySink, AgentLink, CheckpointSource, ConversationSink, CycleInfo, CycleMap,
    EventFanout, FormBroker, FormOutcome, PermissionDenied, PermissionGate, ResultShaper,
    Services, TodoAdapter, TodoItem, TokenTracker, ToolMessage, TurnConfig,
    GLOBAL_PATTERN_KEY,
};
pub use registry::{
    DaemonProbe, RegistryAdapter, Tool, ToolBackend, ToolContext, ToolExecError, BATCH_TOOL,
};
pub use turn::{Orchestrator, TurnError};

use axle_core::{Clock, EventKind};
use axle_plugins::EventBus;
use serde_json::Value;

impl<C: Clock> EventFanout for EventBus<C> {
    fn dispatch(&self, kind: EventKind, payload: Value) {
        EventBus::dispatch(self, kind, payload);
    }
}
