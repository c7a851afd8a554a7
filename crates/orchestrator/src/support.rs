// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator fakes and a turn harness for tests.
//!
//! Compiled for this crate's own tests and, behind the `test-support`
//! feature, for other crates' integration tests.

use crate::context::{
    AgentLink, CheckpointSource, ConversationSink, CycleMap, FormBroker, FormOutcome,
    PermissionDenied, PermissionGate, ResultShaper, Services, TodoAdapter, TodoItem,
    TokenTracker, ToolMessage, TurnConfig,
};
use crate::registry::{
    DaemonProbe, RegistryAdapter, Tool, ToolBackend, ToolContext, ToolExecError,
};
use crate::turn::{Orchestrator, TurnError};
use async_trait::async_trait;
use axle_core::{
    ActivityEvent, CallId, Clock, EventKind, FakeClock, Reminder, SafetyClass, ToolCall,
    ToolDescriptor, ToolResult,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Build a tool call from inline JSON arguments.
pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    let arguments = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCall::new(id, name, arguments)
}

/// Permission gate scripted per tool name; records every prompt.
pub struct StaticPermissions {
    deny: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl StaticPermissions {
    pub fn allow_all() -> Self {
        Self { deny: HashSet::new(), requests: Mutex::new(Vec::new()) }
    }

    pub fn denying<'a>(tools: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            deny: tools.into_iter().map(String::from).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Tool names that were prompted, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn request(
        &self,
        call: &ToolCall,
        _descriptor: &ToolDescriptor,
    ) -> Result<(), PermissionDenied> {
        self.requests.lock().push(call.name.clone());
        if self.deny.contains(&call.name) {
            Err(PermissionDenied::new("user rejected the call"))
        } else {
            Ok(())
        }
    }
}

/// Form broker that always produces the scripted outcome.
pub struct ScriptedForms {
    outcome: FormOutcome,
}

impl ScriptedForms {
    pub fn filling(fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { outcome: FormOutcome::Filled(fields) }
    }

    pub fn cancelling() -> Self {
        Self { outcome: FormOutcome::Cancelled }
    }
}

#[async_trait]
impl FormBroker for ScriptedForms {
    async fn request(&self, _call: &ToolCall, _schema: &Value) -> FormOutcome {
        self.outcome.clone()
    }
}

/// Identity shaper, optionally capping the body length.
pub struct CapShaper {
    cap: Option<usize>,
}

impl CapShaper {
    pub fn identity() -> Self {
        Self { cap: None }
    }

    pub fn at(cap: usize) -> Self {
        Self { cap: Some(cap) }
    }
}

#[async_trait]
impl ResultShaper for CapShaper {
    async fn truncate(&self, _call_id: &CallId, body: String) -> String {
        match self.cap {
            Some(cap) if body.len() > cap => {
                let mut cut = cap;
                while cut > 0 && !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}[truncated]", &body[..cut])
            }
            _ => body,
        }
    }
}

/// Content-hash deduplication tracker.
#[derive(Default)]
pub struct HashTracker {
    seen: Mutex<HashMap<String, CallId>>,
}

impl TokenTracker for HashTracker {
    fn record(&self, call_id: &CallId, body: &str) -> Option<CallId> {
        let mut seen = self.seen.lock();
        match seen.get(body) {
            Some(prior) if prior != call_id => Some(prior.clone()),
            Some(_) => None,
            None => {
                seen.insert(body.to_string(), call_id.clone());
                None
            }
        }
    }
}

struct TodoState {
    in_progress: Option<TodoItem>,
    pending: Vec<TodoItem>,
    promote_fails: bool,
    promotions: Vec<String>,
}

/// In-memory todo manager.
pub struct MemoryTodos {
    state: Mutex<TodoState>,
}

impl MemoryTodos {
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(TodoState {
                in_progress: None,
                pending: Vec::new(),
                promote_fails: false,
                promotions: Vec::new(),
            }),
        }
    }

    pub fn with_pending(titles: &[&str]) -> Self {
        let todos = Self::empty();
        {
            let mut state = todos.state.lock();
            state.pending = titles
                .iter()
                .enumerate()
                .map(|(i, title)| TodoItem { id: format!("todo-{i}"), title: (*title).to_string() })
                .collect();
        }
        todos
    }

    pub fn with_in_progress(title: &str) -> Self {
        let todos = Self::empty();
        todos.state.lock().in_progress =
            Some(TodoItem { id: "todo-active".to_string(), title: title.to_string() });
        todos
    }

    pub fn failing_promotion(self) -> Self {
        self.state.lock().promote_fails = true;
        self
    }

    pub fn promotions(&self) -> Vec<String> {
        self.state.lock().promotions.clone()
    }
}

impl TodoAdapter for MemoryTodos {
    fn in_progress(&self) -> Option<TodoItem> {
        self.state.lock().in_progress.clone()
    }

    fn first_pending(&self) -> Option<TodoItem> {
        self.state.lock().pending.first().cloned()
    }

    fn promote(&self, id: &str) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.promote_fails {
            return Err("todo store unavailable".to_string());
        }
        let Some(index) = state.pending.iter().position(|t| t.id == id) else {
            return Err(format!("unknown todo {id}"));
        };
        let item = state.pending.remove(index);
        state.promotions.push(item.id.clone());
        state.in_progress = Some(item);
        Ok(())
    }
}

/// Captures every emitted activity event.
#[derive(Default)]
pub struct RecordingActivity {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingActivity {
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().clone()
    }

    /// Events for one id, in emission order.
    pub fn kinds_for(&self, id: &str) -> Vec<EventKind> {
        self.events.lock().iter().filter(|e| e.id == id).map(|e| e.kind).collect()
    }
}

impl crate::context::ActivitySink for RecordingActivity {
    fn emit(&self, event: ActivityEvent) {
        self.events.lock().push(event);
    }
}

/// Captures appended conversation messages.
#[derive(Default)]
pub struct RecordingConversation {
    messages: Mutex<Vec<ToolMessage>>,
    resets: AtomicUsize,
}

impl RecordingConversation {
    pub fn messages(&self) -> Vec<ToolMessage> {
        self.messages.lock().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl ConversationSink for RecordingConversation {
    fn append_tool_result(&self, message: ToolMessage) {
        self.messages.lock().push(message);
    }

    fn reset_activity(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }
}

struct StaticCheckpoint {
    text: Option<String>,
}

impl CheckpointSource for StaticCheckpoint {
    fn checkpoint_reminder(&self) -> Option<String> {
        self.text.clone()
    }
}

/// Scriptable in-process tool with shared counters.
#[derive(Clone)]
pub struct TestTool {
    output: String,
    delay: Duration,
    reminder: Option<Reminder>,
    error: Option<ToolExecError>,
    invalid: Option<String>,
    ephemeral: bool,
    executions: Arc<AtomicUsize>,
    previews: Arc<AtomicUsize>,
    seen_args: Arc<Mutex<Option<Map<String, Value>>>>,
}

impl TestTool {
    pub fn ok(output: &str) -> Self {
        Self {
            output: output.to_string(),
            delay: Duration::ZERO,
            reminder: None,
            error: None,
            invalid: None,
            ephemeral: false,
            executions: Arc::new(AtomicUsize::new(0)),
            previews: Arc::new(AtomicUsize::new(0)),
            seen_args: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(error: ToolExecError) -> Self {
        Self { error: Some(error), ..Self::ok("") }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_reminder(mut self, reminder: Reminder) -> Self {
        self.reminder = Some(reminder);
        self
    }

    pub fn rejecting_args(mut self, message: &str) -> Self {
        self.invalid = Some(message.to_string());
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn previews(&self) -> usize {
        self.previews.load(Ordering::Relaxed)
    }

    /// Arguments from the most recent execution.
    pub fn seen_args(&self) -> Option<Map<String, Value>> {
        self.seen_args.lock().clone()
    }
}

#[async_trait]
impl Tool for TestTool {
    async fn preview(&self, _args: &Map<String, Value>, _call_id: &CallId) {
        self.previews.fetch_add(1, Ordering::Relaxed);
    }

    async fn validate(&self, _args: &Map<String, Value>) -> Result<(), String> {
        match &self.invalid {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: ToolContext<'_>,
    ) -> Result<ToolResult, ToolExecError> {
        *self.seen_args.lock() = Some(args);
        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                () = ctx.cancel.cancelled() => return Err(ToolExecError::Interrupted),
            }
        }
        self.executions.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let mut result = ToolResult::ok(self.output.clone());
        if let Some(reminder) = &self.reminder {
            result = result.with_reminder(reminder.clone());
        }
        if self.ephemeral {
            result = result.ephemeral();
        }
        Ok(result)
    }
}

/// A fully wired orchestrator over fakes, driven by a [`FakeClock`].
pub struct Harness {
    pub orchestrator: Orchestrator<FakeClock>,
    pub clock: FakeClock,
    pub abort: CancellationToken,
    pub activity: Arc<RecordingActivity>,
    pub conversation: Arc<RecordingConversation>,
    pub permissions: Arc<StaticPermissions>,
    pub todos: Arc<MemoryTodos>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub async fn run(&self, calls: Vec<ToolCall>) -> Result<Vec<ToolResult>, TurnError> {
        self.orchestrator.execute(calls, CycleMap::new()).await
    }

    pub async fn run_with_cycles(
        &self,
        calls: Vec<ToolCall>,
        cycles: CycleMap,
    ) -> Result<Vec<ToolResult>, TurnError> {
        self.orchestrator.execute(calls, cycles).await
    }
}

pub struct HarnessBuilder {
    registrations: Vec<(ToolDescriptor, ToolBackend)>,
    config: TurnConfig,
    permissions: Option<StaticPermissions>,
    forms: Option<ScriptedForms>,
    todos: Option<MemoryTodos>,
    checkpoint: Option<String>,
    max_duration: Option<Duration>,
    agent_name: String,
    specialized: bool,
    parent_call: Option<CallId>,
    truncate_at: Option<usize>,
    daemons: Option<Arc<dyn DaemonProbe>>,
    fanout: Option<Arc<dyn crate::context::EventFanout>>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
            config: TurnConfig::default(),
            permissions: None,
            forms: None,
            todos: None,
            checkpoint: None,
            max_duration: None,
            agent_name: "main".to_string(),
            specialized: false,
            parent_call: None,
            truncate_at: None,
            daemons: None,
            fanout: None,
        }
    }
}

impl HarnessBuilder {
    /// Register an in-process tool. Read-only tools join the
    /// safe-concurrent set automatically.
    pub fn tool(mut self, descriptor: ToolDescriptor, tool: TestTool) -> Self {
        if descriptor.safety == SafetyClass::ReadOnly {
            self.config.safe_concurrent.insert(descriptor.name.clone());
        }
        self.registrations.push((descriptor, ToolBackend::InProcess(Arc::new(tool))));
        self
    }

    pub fn backend(mut self, descriptor: ToolDescriptor, backend: ToolBackend) -> Self {
        self.registrations.push((descriptor, backend));
        self
    }

    /// Force a tool name into the safe-concurrent set.
    pub fn safe(mut self, name: &str) -> Self {
        self.config.safe_concurrent.insert(name.to_string());
        self
    }

    pub fn permissions(mut self, permissions: StaticPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn forms(mut self, forms: ScriptedForms) -> Self {
        self.forms = Some(forms);
        self
    }

    pub fn todos(mut self, todos: MemoryTodos) -> Self {
        self.todos = Some(todos);
        self
    }

    pub fn checkpoint(mut self, text: &str) -> Self {
        self.checkpoint = Some(text.to_string());
        self
    }

    pub fn max_duration(mut self, max: Duration) -> Self {
        self.max_duration = Some(max);
        self
    }

    pub fn agent(mut self, name: &str) -> Self {
        self.agent_name = name.to_string();
        self
    }

    pub fn specialized(mut self) -> Self {
        self.specialized = true;
        self
    }

    pub fn parent_call(mut self, id: &str) -> Self {
        self.parent_call = Some(CallId::new(id));
        self
    }

    pub fn sequential_only(mut self) -> Self {
        self.config.parallel_tools = false;
        self
    }

    pub fn truncate_at(mut self, cap: usize) -> Self {
        self.truncate_at = Some(cap);
        self
    }

    pub fn exploratory_thresholds(mut self, gentle: u32, stern: u32) -> Self {
        self.config.exploratory_gentle = gentle;
        self.config.exploratory_stern = stern;
        self
    }

    pub fn daemons(mut self, daemons: Arc<dyn DaemonProbe>) -> Self {
        self.daemons = Some(daemons);
        self
    }

    pub fn fanout(mut self, fanout: Arc<dyn crate::context::EventFanout>) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn build(self) -> Harness {
        let mut registry = RegistryAdapter::new();
        if let Some(daemons) = self.daemons {
            registry = registry.with_daemons(daemons);
        }
        for (descriptor, backend) in self.registrations {
            registry.register(descriptor, backend);
        }
        let registry = Arc::new(registry);

        let clock = FakeClock::new();
        let abort = CancellationToken::new();
        let activity = Arc::new(RecordingActivity::default());
        let conversation = Arc::new(RecordingConversation::default());
        let permissions = Arc::new(self.permissions.unwrap_or_else(StaticPermissions::allow_all));
        let todos = Arc::new(self.todos.unwrap_or_else(MemoryTodos::empty));

        let link = AgentLink {
            conversation: conversation.clone(),
            abort: abort.clone(),
            max_duration: self.max_duration,
            turn_started: clock.now(),
            agent_name: self.agent_name,
            specialized: self.specialized,
            registry,
            tokens: Arc::new(HashTracker::default()),
            checkpoint: Arc::new(StaticCheckpoint { text: self.checkpoint }),
        };
        let services = Services {
            permissions: permissions.clone(),
            forms: Arc::new(
                self.forms.unwrap_or_else(|| ScriptedForms::filling(Value::Null)),
            ),
            shaper: Arc::new(match self.truncate_at {
                Some(cap) => CapShaper::at(cap),
                None => CapShaper::identity(),
            }),
            todos: todos.clone(),
            activity: activity.clone(),
            fanout: self.fanout,
        };

        let mut orchestrator = Orchestrator::new(link, services, self.config, clock.clone());
        if let Some(parent) = self.parent_call {
            orchestrator = orchestrator.with_parent_call(parent);
        }

        Harness { orchestrator, clock, abort, activity, conversation, permissions, todos }
    }
}
