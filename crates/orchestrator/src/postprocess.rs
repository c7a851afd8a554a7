// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result serialization helpers for the post-processing pipeline.

use axle_core::{Reminder, ToolResult};
use serde_json::{json, Map, Value};

/// The serialized form sent back to the model and fingerprinted by the
/// deduplication tracker. Transient fields (warning, reminder, turn
/// duration) are already stripped by [`ToolResult::wire_value`].
pub(crate) fn wire_body(result: &ToolResult) -> String {
    result.wire_value().to_string()
}

/// The body handed to the dedup tracker. Execution timestamps and
/// tool-supplied metadata must not defeat content identity, so they are
/// stripped before fingerprinting.
pub(crate) fn dedup_fingerprint(result: &ToolResult) -> String {
    let mut value = result.wire_value();
    if let Value::Object(map) = &mut value {
        map.remove("started_at");
        map.remove("metadata");
    }
    value.to_string()
}

/// Metadata persisted with the conversation message: the ephemeral flag,
/// per-call status, and the execution-start timestamp.
pub(crate) fn metadata(result: &ToolResult) -> Map<String, Value> {
    let mut map = result.metadata.clone();
    map.insert("ephemeral".to_string(), json!(result.ephemeral));
    map.insert("success".to_string(), json!(result.success));
    let status = result.error_kind().map_or("success", |kind| kind.as_str());
    map.insert("status".to_string(), json!(status));
    if let Some(started_at) = result.started_at {
        map.insert("started_at".to_string(), json!(started_at));
    }
    map
}

/// Concatenate `text` onto an existing reminder with a blank-line
/// separator, keeping the existing persistence.
pub(crate) fn merge_reminder(existing: Option<Reminder>, text: String) -> Reminder {
    match existing {
        Some(mut reminder) => {
            reminder.text.push_str("\n\n");
            reminder.text.push_str(&text);
            reminder
        }
        None => Reminder::ephemeral(text),
    }
}

#[cfg(test)]
#[path = "postprocess_tests.rs"]
mod tests;
