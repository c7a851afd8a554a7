// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator seams and the agent capability record.
//!
//! The orchestrator never reaches for globals: everything it needs from
//! the hosting agent and the surrounding application arrives through
//! [`AgentLink`] and [`Services`] at construction time.

use crate::registry::RegistryAdapter;
use async_trait::async_trait;
use axle_core::{ActivityEvent, CallId, EventKind, ToolCall, ToolDescriptor};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Key in the cycles map carrying the turn-wide pattern warning.
pub const GLOBAL_PATTERN_KEY: &str = "global-pattern-detection";

/// Cycle-detection output for one call (or the global pattern slot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    pub warning: String,
}

impl CycleInfo {
    pub fn new(warning: impl Into<String>) -> Self {
        Self { warning: warning.into() }
    }
}

/// Per-call cycle warnings keyed by call id, plus [`GLOBAL_PATTERN_KEY`].
pub type CycleMap = HashMap<String, CycleInfo>;

/// Refusal from the permission collaborator. Group-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDenied {
    pub reason: String,
}

impl PermissionDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::fmt::Display for PermissionDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Permission denied: {}", self.reason)
    }
}

/// Resolves confirmation prompts for destructive tools.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request(
        &self,
        call: &ToolCall,
        descriptor: &ToolDescriptor,
    ) -> Result<(), PermissionDenied>;
}

/// Outcome of an interactive form fill.
#[derive(Debug, Clone, PartialEq)]
pub enum FormOutcome {
    /// User-submitted fields, merged into the call arguments.
    Filled(Map<String, Value>),
    Cancelled,
}

/// Collects interactive form input before the permission prompt.
#[async_trait]
pub trait FormBroker: Send + Sync {
    async fn request(&self, call: &ToolCall, schema: &Value) -> FormOutcome;
}

/// Context-aware truncation of serialized result bodies.
#[async_trait]
pub trait ResultShaper: Send + Sync {
    async fn truncate(&self, call_id: &CallId, body: String) -> String;
}

/// Turn-scoped content fingerprinting for result deduplication.
pub trait TokenTracker: Send + Sync {
    /// Record the formatted result; returns the id of a prior call that
    /// produced identical content, if any.
    fn record(&self, call_id: &CallId, body: &str) -> Option<CallId>;
}

/// One todo entry, as far as the orchestrator cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
}

/// Narrow view of the todo manager.
pub trait TodoAdapter: Send + Sync {
    fn in_progress(&self) -> Option<TodoItem>;
    fn first_pending(&self) -> Option<TodoItem>;
    /// Best effort; the orchestrator ignores failures.
    fn promote(&self, id: &str) -> Result<(), String>;
}

/// Tool-result message appended into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolMessage {
    pub call_id: CallId,
    pub tool: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// The conversation the agent is running.
pub trait ConversationSink: Send + Sync {
    fn append_tool_result(&self, message: ToolMessage);
    /// Clears the UI activity indicator once the turn settles.
    fn reset_activity(&self);
}

/// Receiver for UI lifecycle events.
pub trait ActivitySink: Send + Sync {
    fn emit(&self, event: ActivityEvent);
}

/// Fan-out half of the plugin event bus, as the orchestrator sees it.
pub trait EventFanout: Send + Sync {
    fn dispatch(&self, kind: EventKind, payload: Value);
}

/// Produces the once-per-turn checkpoint reminder.
pub trait CheckpointSource: Send + Sync {
    fn checkpoint_reminder(&self) -> Option<String>;
}

/// Capability record handed over by the hosting agent.
///
/// The agent constructs this first and never holds a backward handle to
/// the orchestrator.
#[derive(Clone)]
pub struct AgentLink {
    pub conversation: Arc<dyn ConversationSink>,
    /// Turn-scoped abort signal; every suspension point races it.
    pub abort: CancellationToken,
    /// Wall-clock budget for the whole turn, if any.
    pub max_duration: Option<Duration>,
    pub turn_started: Instant,
    pub agent_name: String,
    /// Specialized agents are exempt from exploratory-streak nudging.
    pub specialized: bool,
    /// Scoped registry: the per-turn view of the tool catalog.
    pub registry: Arc<RegistryAdapter>,
    pub tokens: Arc<dyn TokenTracker>,
    pub checkpoint: Arc<dyn CheckpointSource>,
}

/// Application services injected into the orchestrator.
///
/// Module-level singleton lookups are forbidden in the core; anything a
/// turn needs is carried here.
#[derive(Clone)]
pub struct Services {
    pub permissions: Arc<dyn PermissionGate>,
    pub forms: Arc<dyn FormBroker>,
    pub shaper: Arc<dyn ResultShaper>,
    pub todos: Arc<dyn TodoAdapter>,
    pub activity: Arc<dyn ActivitySink>,
    /// Plugin event fan-out; absent when no plugins are loaded.
    pub fanout: Option<Arc<dyn EventFanout>>,
}

/// Per-turn policy configuration.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Master switch for the concurrent path.
    pub parallel_tools: bool,
    /// Tools declared safe to dispatch concurrently: read-only tools plus
    /// agent-delegation tools (context-isolated by their scoped registry).
    pub safe_concurrent: HashSet<String>,
    /// Tool names that manage todos; they bypass auto-promotion.
    pub todo_tools: HashSet<String>,
    pub max_batch_size: usize,
    /// Streak length at which the gentle exploratory nudge appears.
    pub exploratory_gentle: u32,
    /// Streak length at which the nudge turns stern.
    pub exploratory_stern: u32,
    /// Agent name whose turns carry the focus reminder.
    pub main_agent: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            parallel_tools: true,
            safe_concurrent: HashSet::new(),
            todo_tools: ["todo_read", "todo_write"].map(String::from).into(),
            max_batch_size: 32,
            exploratory_gentle: 3,
            exploratory_stern: 5,
            main_agent: "main".to_string(),
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
