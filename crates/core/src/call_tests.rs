// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[yare::parameterized(
    permission_denied = { ErrorKind::PermissionDenied, "permission_denied" },
    permission_error  = { ErrorKind::PermissionError,  "permission_error" },
    form_cancelled    = { ErrorKind::FormCancelled,    "form_cancelled" },
    interrupted       = { ErrorKind::Interrupted,      "interrupted" },
    system_error      = { ErrorKind::SystemError,      "system_error" },
    validation_error  = { ErrorKind::ValidationError,  "validation_error" },
)]
fn error_kind_serializes_snake_case(kind: ErrorKind, expected: &str) {
    assert_eq!(kind.as_str(), expected);
    assert_eq!(serde_json::to_value(kind).unwrap(), json!(expected));
}

#[test]
fn tool_error_display_includes_kind_and_tool() {
    let err = ToolError::new(ErrorKind::SystemError, "boom", "read", Map::new());
    assert_eq!(err.to_string(), "read [system_error]: boom");
}

#[test]
fn wire_value_strips_transient_fields() {
    let result = ToolResult::ok("file contents")
        .with_warning("output truncated at 4000 lines")
        .with_reminder(Reminder::ephemeral("keep going"))
        .with_started_at(1234);
    let mut result = result;
    result.total_turn_duration = Some(9999);

    let wire = result.wire_value();
    let obj = wire.as_object().unwrap();
    assert!(obj.get("warning").is_none());
    assert!(obj.get("system_reminder").is_none());
    assert!(obj.get("total_turn_duration").is_none());
    assert_eq!(obj["success"], json!(true));
    assert_eq!(obj["output"], json!("file contents"));
    assert_eq!(obj["started_at"], json!(1234));
}

#[test]
fn wire_value_keeps_structured_error() {
    let result = ToolResult::fail_with(
        ErrorKind::PermissionDenied,
        "Permission denied",
        "write",
        args(&[("path", json!("/etc/passwd"))]),
    );
    let wire = result.wire_value();
    assert_eq!(wire["success"], json!(false));
    assert_eq!(wire["error"]["kind"], json!("permission_denied"));
    assert_eq!(wire["error"]["tool"], json!("write"));
    assert_eq!(wire["error"]["args"]["path"], json!("/etc/passwd"));
}

#[test]
fn reminders_default_ephemeral() {
    assert!(!Reminder::ephemeral("x").persist);
    assert!(Reminder::persistent("x").persist);

    let parsed: Reminder = serde_json::from_value(json!({ "text": "x" })).unwrap();
    assert!(!parsed.persist);
}

#[test]
fn result_builder_flags() {
    let result = ToolResult::ok("ls output").ephemeral().no_truncate();
    assert!(result.ephemeral);
    assert!(result.no_truncate);
    assert_eq!(result.error_kind(), None);
}

#[test]
fn tool_call_roundtrips_through_json() {
    let call = ToolCall::new("call-1", "read", args(&[("path", json!("/x"))]));
    let json = serde_json::to_string(&call).unwrap();
    let back: ToolCall = serde_json::from_str(&json).unwrap();
    assert_eq!(back, call);
}
