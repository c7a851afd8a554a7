// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activity lifecycle events.
//!
//! Every tool call and group emits a start/end pair; a fixed subset of
//! kinds ([`APPROVED_EVENTS`]) is additionally fanned out to plugin
//! subscribers.

use crate::id::CallId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed enum of activity-event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ToolCallStart,
    ToolCallEnd,
    ToolOutputChunk,
    ToolPermissionRequest,
    ToolExecutionStart,
    ToolFormRequest,
    ToolFormResponse,
    ToolFormCancel,
    Error,
    AgentStart,
    AgentEnd,
    PermissionRequest,
    PermissionResponse,
    CompactionStart,
    CompactionComplete,
    ContextUsageUpdate,
    TodoUpdate,
    ThoughtComplete,
    DiffPreview,
}

/// Event kinds plugins are permitted to subscribe to.
pub const APPROVED_EVENTS: [EventKind; 12] = [
    EventKind::ToolCallStart,
    EventKind::ToolCallEnd,
    EventKind::AgentStart,
    EventKind::AgentEnd,
    EventKind::PermissionRequest,
    EventKind::PermissionResponse,
    EventKind::CompactionStart,
    EventKind::CompactionComplete,
    EventKind::ContextUsageUpdate,
    EventKind::TodoUpdate,
    EventKind::ThoughtComplete,
    EventKind::DiffPreview,
];

impl EventKind {
    /// Wire name, e.g. `TOOL_CALL_START`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ToolCallStart => "TOOL_CALL_START",
            EventKind::ToolCallEnd => "TOOL_CALL_END",
            EventKind::ToolOutputChunk => "TOOL_OUTPUT_CHUNK",
            EventKind::ToolPermissionRequest => "TOOL_PERMISSION_REQUEST",
            EventKind::ToolExecutionStart => "TOOL_EXECUTION_START",
            EventKind::ToolFormRequest => "TOOL_FORM_REQUEST",
            EventKind::ToolFormResponse => "TOOL_FORM_RESPONSE",
            EventKind::ToolFormCancel => "TOOL_FORM_CANCEL",
            EventKind::Error => "ERROR",
            EventKind::AgentStart => "AGENT_START",
            EventKind::AgentEnd => "AGENT_END",
            EventKind::PermissionRequest => "PERMISSION_REQUEST",
            EventKind::PermissionResponse => "PERMISSION_RESPONSE",
            EventKind::CompactionStart => "COMPACTION_START",
            EventKind::CompactionComplete => "COMPACTION_COMPLETE",
            EventKind::ContextUsageUpdate => "CONTEXT_USAGE_UPDATE",
            EventKind::TodoUpdate => "TODO_UPDATE",
            EventKind::ThoughtComplete => "THOUGHT_COMPLETE",
            EventKind::DiffPreview => "DIFF_PREVIEW",
        }
    }

    /// Whether plugin subscribers may receive this kind.
    pub fn is_approved(self) -> bool {
        APPROVED_EVENTS.contains(&self)
    }

    /// Parse a wire name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One lifecycle record emitted to the activity sink.
///
/// `seq` is a process-monotonic counter assigned at emission, so ordering
/// invariants hold even when the wall clock does not advance between
/// events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Tool-call id or group id this event belongs to.
    pub id: CallId,
    pub kind: EventKind,
    /// Wall-clock time, epoch milliseconds.
    pub ts_ms: u64,
    /// Emission order within the process.
    pub seq: u64,
    /// Enclosing group or outer agent call, for tree composition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CallId>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl ActivityEvent {
    pub fn new(id: impl Into<CallId>, kind: EventKind, ts_ms: u64, seq: u64) -> Self {
        Self { id: id.into(), kind, ts_ms, seq, parent: None, payload: Map::new() }
    }

    pub fn with_parent(mut self, parent: impl Into<CallId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

/// Transient record of a concurrent batch, alive between the group start
/// and group end events.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolGroup {
    pub id: crate::id::GroupId,
    pub parent: Option<CallId>,
    pub members: Vec<CallId>,
}

impl ToolGroup {
    pub fn new(parent: Option<CallId>, members: Vec<CallId>) -> Self {
        Self { id: crate::id::GroupId::generate(), parent, members }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
