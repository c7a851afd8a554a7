// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool call and result records.
//!
//! A [`ToolCall`] is the immutable input record for one tool invocation;
//! a [`ToolResult`] is what comes back. Failures are data (a structured
//! [`ToolError`] inside the result), never panics: the orchestrator maps
//! every exception at the call boundary into an [`ErrorKind`].

use crate::id::CallId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Classification of a tool failure, surfaced to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The permission collaborator declined the call. Group-fatal.
    PermissionDenied,
    /// The tool is not visible to the calling agent.
    PermissionError,
    /// The user cancelled an interactive form.
    FormCancelled,
    /// The turn abort signal fired while the call was in flight.
    Interrupted,
    /// Anything unexpected: I/O, RPC, tool panic surfaced as error.
    SystemError,
    /// Pre-permission validation rejected the arguments.
    ValidationError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::PermissionError => "permission_error",
            ErrorKind::FormCancelled => "form_cancelled",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::SystemError => "system_error",
            ErrorKind::ValidationError => "validation_error",
        }
    }
}

/// Structured tool failure: kind, human message, tool name, offending args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl ToolError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        tool: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self { kind, message: message.into(), tool: tool.into(), args }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.tool, self.kind.as_str(), self.message)
    }
}

/// One tool invocation as produced by the model. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: CallId,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<CallId>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

/// A system reminder attached to a formatted result.
///
/// Ephemeral by default: the session collaborator strips non-persistent
/// reminders at turn end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub text: String,
    #[serde(default)]
    pub persist: bool,
}

impl Reminder {
    /// A reminder that is stripped at turn end.
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { text: text.into(), persist: false }
    }

    /// A reminder that survives into subsequent turns.
    pub fn persistent(text: impl Into<String>) -> Self {
        Self { text: text.into(), persist: true }
    }
}

/// Output record for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    /// Textual payload on success (tool output, already rendered).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,

    /// Structured failure when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    /// Appended after truncation so it always survives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,

    /// Reminder injected by the tool itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_reminder: Option<Reminder>,

    /// Wall-clock start of execution, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,

    /// Total turn duration budget consumed, milliseconds. Stripped from
    /// the wire form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_turn_duration: Option<u64>,

    /// Opaque metadata persisted with the session message.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Ephemeral results are skipped by deduplication and stripped by the
    /// session collaborator at turn end.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,

    /// Opts the payload out of context-aware truncation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_truncate: bool,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            warning: None,
            system_reminder: None,
            started_at: None,
            total_turn_duration: None,
            metadata: Map::new(),
            ephemeral: false,
            no_truncate: false,
        }
    }

    pub fn fail(error: ToolError) -> Self {
        Self { success: false, error: Some(error), ..Self::ok("") }
    }

    /// Shorthand for a failure constructed in place.
    pub fn fail_with(
        kind: ErrorKind,
        message: impl Into<String>,
        tool: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self::fail(ToolError::new(kind, message, tool, args))
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_reminder(mut self, reminder: Reminder) -> Self {
        self.system_reminder = Some(reminder);
        self
    }

    pub fn with_started_at(mut self, epoch_ms: u64) -> Self {
        self.started_at = Some(epoch_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.no_truncate = true;
        self
    }

    /// Error kind, if this result is a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// The JSON form serialized back into the conversation.
    ///
    /// `warning`, `system_reminder`, and `total_turn_duration` are stripped:
    /// the warning is re-appended after truncation and reminders are
    /// injected in tag form, outside the JSON body.
    pub fn wire_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("warning");
            map.remove("system_reminder");
            map.remove("total_turn_duration");
        }
        value
    }
}

#[cfg(test)]
#[path = "call_tests.rs"]
mod tests;
