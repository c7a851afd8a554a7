// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-turn tool dispatch.
//!
//! One `execute` call handles one batch of tool calls from the model:
//! batch unwrapping, the concurrency policy, the per-call state machine
//! with matched start/end events on every exit path, and group-fatal
//! permission handling. Result post-processing happens afterwards, in
//! input order, regardless of completion order.

use crate::context::{
    AgentLink, CycleMap, FormOutcome, Services, ToolMessage, TurnConfig, GLOBAL_PATTERN_KEY,
};
use crate::postprocess::{dedup_fingerprint, merge_reminder, metadata, wire_body};
use crate::registry::BATCH_TOOL;
use crate::reminders::{self, ReminderCtx};
use axle_core::{
    ActivityEvent, CallId, Clock, ErrorKind, EventKind, SystemClock, ToolCall, ToolGroup,
    ToolResult,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The only error that escapes a turn: everything else settles into a
/// result. Permission denial aborts the whole group and re-raises.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Permission denied for {tool} ({call_id}): {reason}")]
    PermissionDenied { call_id: CallId, tool: String, reason: String },
}

/// Dispatches one turn of tool calls.
///
/// One instance serves one agent; callers must not share it across
/// concurrent turns. The exploratory streak deliberately survives from
/// one sequential turn to the next.
pub struct Orchestrator<C: Clock = SystemClock> {
    link: AgentLink,
    services: Services,
    config: TurnConfig,
    clock: C,
    /// Non-empty when this orchestrator serves a nested agent call.
    parent_call_id: Option<CallId>,
    seq: AtomicU64,
    streak: AtomicU32,
}

impl<C: Clock> Orchestrator<C> {
    pub fn new(link: AgentLink, services: Services, config: TurnConfig, clock: C) -> Self {
        Self {
            link,
            services,
            config,
            clock,
            parent_call_id: None,
            seq: AtomicU64::new(0),
            streak: AtomicU32::new(0),
        }
    }

    /// Nest this orchestrator under an enclosing agent tool call.
    pub fn with_parent_call(mut self, parent: CallId) -> Self {
        self.parent_call_id = Some(parent);
        self
    }

    /// Current exploratory streak, for inspection.
    pub fn exploratory_streak(&self) -> u32 {
        self.streak.load(Ordering::Relaxed)
    }

    /// Run one turn. The returned list is 1:1 with the unwrapped call
    /// list, in input order.
    pub async fn execute(
        &self,
        turn: Vec<ToolCall>,
        cycles: CycleMap,
    ) -> Result<Vec<ToolResult>, TurnError> {
        let calls = self.unwrap_batches(turn);
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // One checkpoint reminder per turn, attached to the first result.
        let checkpoint = self.link.checkpoint.checkpoint_reminder();

        let concurrent = calls.len() > 1
            && self.config.parallel_tools
            && calls.iter().all(|call| self.config.safe_concurrent.contains(&call.name));
        debug!(calls = calls.len(), concurrent, "turn dispatch");

        let mut results = if concurrent {
            self.dispatch_concurrent(&calls).await?
        } else {
            self.dispatch_sequential(&calls).await?
        };

        self.postprocess(&calls, &mut results, &cycles, checkpoint).await;
        self.link.conversation.reset_activity();
        Ok(results)
    }

    /// Promote `batch` wrappers into their member calls.
    ///
    /// Invalid batches pass through unchanged so the registry's batch
    /// handler produces the authoritative error.
    fn unwrap_batches(&self, turn: Vec<ToolCall>) -> Vec<ToolCall> {
        let mut out = Vec::with_capacity(turn.len());
        for call in turn {
            if call.name != BATCH_TOOL {
                out.push(call);
                continue;
            }
            match parse_batch(&call.arguments, self.config.max_batch_size) {
                Some(members) => {
                    debug!(parent = %call.id, members = members.len(), "batch unwrapped");
                    for (index, (name, arguments)) in members.into_iter().enumerate() {
                        out.push(ToolCall::new(CallId::unwrapped(&call.id, index), name, arguments));
                    }
                }
                None => out.push(call),
            }
        }
        out
    }

    async fn dispatch_sequential(
        &self,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolResult>, TurnError> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self
                .run_call(call, self.parent_call_id.clone(), false, self.link.abort.clone())
                .await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn dispatch_concurrent(
        &self,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolResult>, TurnError> {
        let group =
            ToolGroup::new(self.parent_call_id.clone(), calls.iter().map(|c| c.id.clone()).collect());
        let group_id = group.id.as_call_id();

        let start = self
            .event(group_id.clone(), EventKind::ToolCallStart)
            .with_field("group", json!(true))
            .with_field("member_count", json!(calls.len()))
            .with_field("collapsed", json!(false));
        self.emit(attach_parent(start, group.parent.clone()));

        // Every member start goes out before any member begins executing,
        // so batched calls appear atomically in the UI.
        for call in calls {
            self.emit_call_start(call, Some(group_id.clone()));
        }

        let group_cancel = self.link.abort.child_token();
        let settled: Mutex<HashMap<CallId, ToolResult>> = Mutex::new(HashMap::new());
        let ended: Mutex<HashSet<CallId>> = Mutex::new(HashSet::new());

        let settled_ref = &settled;
        let ended_ref = &ended;
        let group_cancel_ref = &group_cancel;
        let members = calls.iter().map(|call| {
            let cancel = group_cancel.clone();
            let parent = group_id.clone();
            async move {
                match self.run_call(call, Some(parent), true, cancel).await {
                    Ok(result) => {
                        ended_ref.lock().insert(call.id.clone());
                        settled_ref.lock().insert(call.id.clone(), result);
                        None
                    }
                    Err(denied) => {
                        // run_call already emitted this member's end event.
                        ended_ref.lock().insert(call.id.clone());
                        group_cancel_ref.cancel();
                        Some(denied)
                    }
                }
            }
        });
        let denial = join_all(members).await.into_iter().flatten().next();

        // Backstop: a member that somehow never reached its own end event
        // still gets one, from its settled result or a placeholder.
        {
            let ended = ended.lock();
            let settled = settled.lock();
            for call in calls {
                if !ended.contains(call.id.as_str()) {
                    let result = settled.get(call.id.as_str()).cloned().unwrap_or_else(|| {
                        ToolResult::fail_with(
                            ErrorKind::SystemError,
                            "Unknown error",
                            &call.name,
                            call.arguments.clone(),
                        )
                    });
                    self.emit_call_end(call, Some(group_id.clone()), &result, None);
                }
            }
        }

        let settled = settled.into_inner();
        if let Some(denied) = denial {
            let end = self
                .event(group_id, EventKind::ToolCallEnd)
                .with_field("group", json!(true))
                .with_field("success", json!(false))
                .with_field("error", json!("Permission denied"))
                .with_field("collapsed", json!(false));
            self.emit(attach_parent(end, group.parent));
            return Err(denied);
        }

        let mut results = Vec::with_capacity(calls.len());
        let mut success = true;
        for call in calls {
            let result = settled.get(call.id.as_str()).cloned().unwrap_or_else(|| {
                ToolResult::fail_with(
                    ErrorKind::SystemError,
                    "Unknown error",
                    &call.name,
                    call.arguments.clone(),
                )
            });
            success &= result.success;
            results.push(result);
        }

        let end = self
            .event(group_id, EventKind::ToolCallEnd)
            .with_field("group", json!(true))
            .with_field("success", json!(success))
            .with_field("collapsed", json!(false));
        self.emit(attach_parent(end, group.parent));
        Ok(results)
    }

    /// The per-call state machine.
    ///
    /// Every exit path pairs the start event with exactly one end event;
    /// only permission denial escapes as an error (after emitting its
    /// own end), so the dispatcher can abort the group.
    async fn run_call(
        &self,
        call: &ToolCall,
        parent: Option<CallId>,
        start_emitted: bool,
        cancel: CancellationToken,
    ) -> Result<ToolResult, TurnError> {
        if !start_emitted {
            self.emit_call_start(call, parent.clone());
        }

        // Preview attaches diff widgets to the record the start event
        // just created.
        self.link.registry.preview(call).await;

        let descriptor = self.link.registry.descriptor(&call.name).cloned();
        let requires_confirmation =
            descriptor.as_ref().is_some_and(|d| d.requires_confirmation);

        // Pre-permission validation: a failure short-circuits without a
        // permission prompt.
        if requires_confirmation {
            if let Err(message) = self.link.registry.validate(call).await {
                let result = ToolResult::fail_with(
                    ErrorKind::ValidationError,
                    message,
                    &call.name,
                    call.arguments.clone(),
                );
                self.emit_call_end(call, parent, &result, None);
                return Ok(result);
            }
        }

        // Interactive form, before permission.
        let mut arguments = call.arguments.clone();
        if let Some(schema) = descriptor.as_ref().and_then(|d| d.form_schema.clone()) {
            self.emit(attach_parent(
                self.event(call.id.clone(), EventKind::ToolFormRequest)
                    .with_field("tool_name", json!(call.name)),
                parent.clone(),
            ));
            let outcome = tokio::select! {
                outcome = self.services.forms.request(call, &schema) => Some(outcome),
                () = cancel.cancelled() => None,
            };
            match outcome {
                None => {
                    let result = self.interrupted_result(call);
                    self.emit_call_end(call, parent, &result, None);
                    return Ok(result);
                }
                Some(FormOutcome::Cancelled) => {
                    self.emit(attach_parent(
                        self.event(call.id.clone(), EventKind::ToolFormCancel),
                        parent.clone(),
                    ));
                    let result = ToolResult::fail_with(
                        ErrorKind::FormCancelled,
                        format!("User cancelled the {} form", call.name),
                        &call.name,
                        call.arguments.clone(),
                    );
                    self.emit_call_end(call, parent, &result, None);
                    return Ok(result);
                }
                Some(FormOutcome::Filled(fields)) => {
                    self.emit(attach_parent(
                        self.event(call.id.clone(), EventKind::ToolFormResponse),
                        parent.clone(),
                    ));
                    for (key, value) in fields {
                        arguments.insert(key, value);
                    }
                }
            }
        }

        // Permission gate. Denial is group-fatal.
        if let Some(desc) = descriptor.as_ref().filter(|d| d.requires_confirmation) {
            self.emit(attach_parent(
                self.event(call.id.clone(), EventKind::ToolPermissionRequest)
                    .with_field("tool_name", json!(call.name)),
                parent.clone(),
            ));
            let outcome = tokio::select! {
                outcome = self.services.permissions.request(call, desc) => Some(outcome),
                () = cancel.cancelled() => None,
            };
            match outcome {
                None => {
                    let result = self.interrupted_result(call);
                    self.emit_call_end(call, parent, &result, None);
                    return Ok(result);
                }
                Some(Err(denied)) => {
                    info!(tool = %call.name, call_id = %call.id, "permission denied");
                    let result = ToolResult::fail_with(
                        ErrorKind::PermissionDenied,
                        denied.to_string(),
                        &call.name,
                        call.arguments.clone(),
                    );
                    self.emit_call_end(call, parent, &result, None);
                    return Err(TurnError::PermissionDenied {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        reason: denied.reason,
                    });
                }
                Some(Ok(())) => {}
            }
        }

        // Best-effort todo promotion before any non-todo tool runs.
        if !self.config.todo_tools.contains(&call.name) {
            self.promote_pending_todo();
        }

        let started_at = self.clock.epoch_ms();
        let exec_started = self.clock.now();
        self.emit(attach_parent(
            self.event(call.id.clone(), EventKind::ToolExecutionStart),
            parent.clone(),
        ));

        let exec_call = ToolCall::new(call.id.clone(), call.name.clone(), arguments);
        let mut result =
            self.link.registry.execute(&exec_call, cancel, &self.link.agent_name).await;
        result.started_at = Some(started_at);

        let duration_ms = self.clock.elapsed_since(exec_started).as_millis() as u64;
        self.emit_call_end(call, parent, &result, Some(duration_ms));
        Ok(result)
    }

    fn interrupted_result(&self, call: &ToolCall) -> ToolResult {
        ToolResult::fail_with(
            ErrorKind::Interrupted,
            "interrupted",
            &call.name,
            call.arguments.clone(),
        )
    }

    fn promote_pending_todo(&self) {
        if self.services.todos.in_progress().is_some() {
            return;
        }
        let Some(pending) = self.services.todos.first_pending() else { return };
        if let Err(e) = self.services.todos.promote(&pending.id) {
            // Best effort only.
            debug!(todo = %pending.id, error = %e, "todo auto-promotion failed");
        }
    }

    /// Result post-processing, in input order: exploratory streak,
    /// checkpoint, dedup, formatting, reminder injection, conversation
    /// append.
    async fn postprocess(
        &self,
        calls: &[ToolCall],
        results: &mut [ToolResult],
        cycles: &CycleMap,
        checkpoint: Option<String>,
    ) {
        let mut checkpoint = checkpoint;
        for (index, (call, result)) in calls.iter().zip(results.iter_mut()).enumerate() {
            let descriptor = self.link.registry.descriptor(&call.name);
            let exploratory = descriptor.is_some_and(|d| d.exploratory);
            let breaks_streak = descriptor.is_none_or(|d| d.breaks_exploratory_streak);

            let mut streak_text = None;
            if exploratory && !self.link.specialized {
                let streak = self.streak.fetch_add(1, Ordering::Relaxed) + 1;
                if streak >= self.config.exploratory_stern {
                    streak_text = Some(reminders::exploratory_stern(streak));
                } else if streak >= self.config.exploratory_gentle {
                    streak_text = Some(reminders::exploratory_gentle(streak));
                }
            } else if !exploratory && breaks_streak {
                self.streak.store(0, Ordering::Relaxed);
            }

            // Checkpoint (first result only) and streak text merge into
            // the tool's own reminder slot, blank-line separated.
            let mut tool_reminder = result.system_reminder.clone();
            if index == 0 {
                if let Some(text) = checkpoint.take() {
                    tool_reminder = Some(merge_reminder(tool_reminder, text));
                }
            }
            if let Some(text) = streak_text {
                tool_reminder = Some(merge_reminder(tool_reminder, text));
            }

            // Dedup: ephemeral results are never fingerprinted.
            if !result.ephemeral {
                let fingerprint = dedup_fingerprint(result);
                if let Some(prior) = self.link.tokens.record(&call.id, &fingerprint) {
                    debug!(call_id = %call.id, prior = %prior, "duplicate result elided");
                    result.output = reminders::dedup_notice(&prior);
                }
            }

            let mut body = wire_body(result);
            if !result.no_truncate {
                body = self.services.shaper.truncate(&call.id, body).await;
            }
            // The warning goes on after truncation so it always survives.
            if let Some(warning) = &result.warning {
                body.push_str("\n\n");
                body.push_str(warning);
            }

            let ctx = ReminderCtx {
                tool_reminder,
                time: self
                    .link
                    .max_duration
                    .map(|max| (self.clock.elapsed_since(self.link.turn_started), max)),
                cycle_warning: cycles.get(call.id.as_str()).map(|c| c.warning.clone()),
                global_warning: if index == 0 {
                    cycles.get(GLOBAL_PATTERN_KEY).map(|c| c.warning.clone())
                } else {
                    None
                },
                focus: if self.link.agent_name == self.config.main_agent {
                    self.services.todos.in_progress().map(|todo| todo.title)
                } else {
                    None
                },
            };
            reminders::inject(&mut body, &reminders::assemble(&ctx));

            self.link.conversation.append_tool_result(ToolMessage {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                content: body,
                metadata: metadata(result),
            });
        }
    }

    fn event(&self, id: CallId, kind: EventKind) -> ActivityEvent {
        ActivityEvent::new(id, kind, self.clock.epoch_ms(), self.seq.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: ActivityEvent) {
        if event.kind.is_approved() {
            if let Some(fanout) = &self.services.fanout {
                let payload = serde_json::to_value(&event).unwrap_or(Value::Null);
                fanout.dispatch(event.kind, payload);
            }
        }
        self.services.activity.emit(event);
    }

    fn emit_call_start(&self, call: &ToolCall, parent: Option<CallId>) {
        let flags = self.link.registry.display_flags(&call.name);
        let event = self
            .event(call.id.clone(), EventKind::ToolCallStart)
            .with_field("tool_name", json!(call.name))
            .with_field("collapsed", json!(false))
            .with_field("should_collapse", json!(flags.collapse_after_completion))
            .with_field("visible_in_chat", json!(flags.visible_in_chat))
            .with_field("transparent", json!(flags.transparent));
        self.emit(attach_parent(event, parent));
    }

    fn emit_call_end(
        &self,
        call: &ToolCall,
        parent: Option<CallId>,
        result: &ToolResult,
        duration_ms: Option<u64>,
    ) {
        let flags = self.link.registry.display_flags(&call.name);
        let mut event = self
            .event(call.id.clone(), EventKind::ToolCallEnd)
            .with_field("tool_name", json!(call.name))
            .with_field("success", json!(result.success))
            .with_field("collapsed", json!(false))
            .with_field("should_collapse", json!(flags.collapse_after_completion))
            // A failing call surfaces in the chat even for normally
            // silent tools, so the user has diagnostic context.
            .with_field("visible_in_chat", json!(flags.visible_in_chat || !result.success));
        if let Some(error) = &result.error {
            event = event
                .with_field("error", json!(error.message))
                .with_field("error_kind", json!(error.kind.as_str()));
        }
        if let Some(duration_ms) = duration_ms {
            event = event.with_field("duration_ms", json!(duration_ms));
        }
        self.emit(attach_parent(event, parent));
    }
}

fn attach_parent(event: ActivityEvent, parent: Option<CallId>) -> ActivityEvent {
    match parent {
        Some(parent) => event.with_parent(parent),
        None => event,
    }
}

/// Validate and decompose a batch argument map.
fn parse_batch(
    args: &Map<String, Value>,
    max: usize,
) -> Option<Vec<(String, Map<String, Value>)>> {
    let tools = args.get("tools")?.as_array()?;
    if tools.is_empty() || tools.len() > max {
        return None;
    }
    let mut members = Vec::with_capacity(tools.len());
    for entry in tools {
        let entry = entry.as_object()?;
        let name = entry.get("name")?.as_str()?;
        let arguments = entry.get("arguments")?.as_object()?;
        members.push((name.to_string(), arguments.clone()));
    }
    Some(members)
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
