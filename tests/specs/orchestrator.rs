//! Turn dispatch specs: the concurrency policy, event discipline, and
//! post-processing behavior visible to a whole-system observer.

use crate::prelude::*;
use axle_orchestrator::TurnError;
use serde_json::json;

#[tokio::test]
async fn single_read_runs_sequentially_without_permission_events() {
    let harness = Harness::builder()
        .tool(ToolDescriptor::read_only("read"), TestTool::ok("contents of /x"))
        .build();

    let results =
        harness.run(vec![call("c1", "read", json!({ "path": "/x" }))]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);

    assert_eq!(
        harness.activity.kinds_for("c1"),
        [EventKind::ToolCallStart, EventKind::ToolExecutionStart, EventKind::ToolCallEnd]
    );
    assert!(harness
        .activity
        .events()
        .iter()
        .all(|e| e.kind != EventKind::ToolPermissionRequest));
}

#[tokio::test]
async fn concurrent_reads_keep_input_order_and_group_discipline() {
    let harness = Harness::builder()
        .tool(
            ToolDescriptor::read_only("read"),
            TestTool::ok("slow result").with_delay(Duration::from_millis(60)),
        )
        .tool(ToolDescriptor::read_only("grep"), TestTool::ok("fast result"))
        .build();

    let results = harness
        .run(vec![
            call("c1", "read", json!({ "path": "/a" })),
            call("c2", "grep", json!({ "q": "x" })),
        ])
        .await
        .unwrap();

    // c2 finishes first; the returned order still matches the input.
    assert_eq!(results[0].output, "slow result");
    assert_eq!(results[1].output, "fast result");

    let events = harness.activity.events();
    let group_id = events
        .iter()
        .find(|e| e.kind == EventKind::ToolCallStart && e.payload.get("group").is_some())
        .map(|e| e.id.clone())
        .expect("group start event");

    // group start < member starts < execution starts < member ends < group end
    let seq_of = |pred: &dyn Fn(&axle_core::ActivityEvent) -> bool| -> Vec<u64> {
        events.iter().filter(|e| pred(e)).map(|e| e.seq).collect()
    };
    let group_start = seq_of(&|e| e.kind == EventKind::ToolCallStart && e.id == group_id)[0];
    let member_starts = seq_of(&|e| e.kind == EventKind::ToolCallStart && e.id != group_id);
    let exec_starts = seq_of(&|e| e.kind == EventKind::ToolExecutionStart);
    let member_ends = seq_of(&|e| e.kind == EventKind::ToolCallEnd && e.id != group_id);
    let group_end = seq_of(&|e| e.kind == EventKind::ToolCallEnd && e.id == group_id)[0];

    assert!(member_starts.iter().all(|s| group_start < *s));
    assert!(member_starts.iter().max() < exec_starts.iter().min());
    assert!(member_ends.iter().all(|s| *s < group_end));
}

#[tokio::test]
async fn permission_denial_mid_group_ends_every_member_and_reraises() {
    let harness = Harness::builder()
        .tool(
            ToolDescriptor::read_only("read"),
            TestTool::ok("r").with_delay(Duration::from_millis(150)),
        )
        .tool(ToolDescriptor::destructive("write"), TestTool::ok("w"))
        .safe("write")
        .permissions(StaticPermissions::denying(["write"]))
        .build();

    let err = harness
        .run(vec![
            call("c1", "read", json!({ "path": "/a" })),
            call("c2", "write", json!({ "path": "/b" })),
            call("c3", "read", json!({ "path": "/c" })),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::PermissionDenied { .. }));

    let events = harness.activity.events();
    for id in ["c1", "c2", "c3"] {
        let starts =
            events.iter().filter(|e| e.kind == EventKind::ToolCallStart && e.id == id).count();
        let ends =
            events.iter().filter(|e| e.kind == EventKind::ToolCallEnd && e.id == id).count();
        assert_eq!(starts, 1, "exactly one start for {id}");
        assert_eq!(ends, 1, "exactly one end for {id}");
    }

    let group_end = events
        .iter()
        .find(|e| e.kind == EventKind::ToolCallEnd && e.payload.get("group").is_some())
        .expect("group end");
    assert_eq!(group_end.payload["success"], json!(false));
    assert_eq!(group_end.payload["error"], json!("Permission denied"));
}

#[tokio::test]
async fn batch_unwraps_into_concurrent_synthetic_calls() {
    let harness = Harness::builder()
        .tool(ToolDescriptor::read_only("read"), TestTool::ok("r"))
        .tool(ToolDescriptor::read_only("grep"), TestTool::ok("g"))
        .build();

    let results = harness
        .run(vec![call(
            "parent",
            axle_orchestrator::BATCH_TOOL,
            json!({ "tools": [
                { "name": "read", "arguments": { "p": "/a" } },
                { "name": "grep", "arguments": { "q": "x" } },
            ] }),
        )])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let events = harness.activity.events();
    assert!(events.iter().any(|e| e.id == "parent-unwrapped-0"));
    assert!(events.iter().any(|e| e.id == "parent-unwrapped-1"));
    assert!(events.iter().any(|e| e.payload.get("group").is_some()), "members run concurrently");
}

#[tokio::test]
async fn exploratory_streak_gentle_then_stern_then_reset() {
    let harness = Harness::builder()
        .tool(ToolDescriptor::read_only("grep").exploratory(), TestTool::ok("hits"))
        .tool(ToolDescriptor::destructive("edit").with_confirmation(false), TestTool::ok("ok"))
        .exploratory_thresholds(3, 5)
        .build();

    for i in 1..=5 {
        harness.run(vec![call(&format!("c{i}"), "grep", json!({}))]).await.unwrap();
    }
    let messages = harness.conversation.messages();
    assert!(!messages[0].content.contains("exploratory"), "no nudge on #1");
    assert!(!messages[1].content.contains("exploratory"), "no nudge on #2");
    assert!(messages[2].content.contains("exploratory"), "gentle on #3");
    assert!(messages[3].content.contains("exploratory"), "gentle on #4");
    assert!(messages[4].content.contains("without acting"), "stern on #5");

    harness.run(vec![call("c6", "edit", json!({}))]).await.unwrap();
    assert_eq!(harness.orchestrator.exploratory_streak(), 0);
}

#[tokio::test]
async fn one_checkpoint_reminder_per_turn_across_all_results() {
    let harness = Harness::builder()
        .tool(ToolDescriptor::read_only("read"), TestTool::ok("x"))
        .checkpoint("Checkpoint: consider committing.")
        .sequential_only()
        .build();

    harness
        .run(vec![
            call("c1", "read", json!({})),
            call("c2", "read", json!({ "other": true })),
            call("c3", "read", json!({ "third": true })),
        ])
        .await
        .unwrap();

    let with_checkpoint = harness
        .conversation
        .messages()
        .iter()
        .filter(|m| m.content.contains("Checkpoint: consider committing."))
        .count();
    assert_eq!(with_checkpoint, 1);
}
