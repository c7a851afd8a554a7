// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool metadata consumed by the orchestrator.

use crate::id::PluginName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Whether a tool may run in parallel with its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyClass {
    /// No side effects beyond reading the filesystem or network;
    /// safe to dispatch concurrently.
    ReadOnly,
    /// Mutating; always dispatched sequentially.
    Destructive,
}

/// Declarative UI behavior for a tool's chat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayFlags {
    /// Render the call in the chat transcript at all.
    #[serde(default)]
    pub visible_in_chat: bool,
    /// Wrapper tools (`batch`) whose members render individually.
    #[serde(default)]
    pub transparent: bool,
    /// Collapse the record once the call completes.
    #[serde(default)]
    pub collapse_after_completion: bool,
    /// Suppress the output body, keep the header row.
    #[serde(default)]
    pub hide_output: bool,
    /// Never elide the output, even when long.
    #[serde(default)]
    pub always_show_full: bool,
}

/// Metadata describing one registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub safety: SafetyClass,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub display: DisplayFlags,
    /// Tool streams TOOL_OUTPUT_CHUNK events while executing.
    #[serde(default)]
    pub streaming: bool,
    /// Counts toward the exploratory streak.
    #[serde(default)]
    pub exploratory: bool,
    /// Non-exploratory tools reset the streak unless they opt out.
    #[serde(default = "default_true")]
    pub breaks_exploratory_streak: bool,
    /// When present, only these agents may call the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_to: Option<BTreeSet<String>>,
    /// Owning plugin, for plugin-provided tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginName>,
    /// Static form schema filled interactively before permission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_schema: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl ToolDescriptor {
    pub fn read_only(name: impl Into<String>) -> Self {
        Self::new(name, SafetyClass::ReadOnly)
    }

    pub fn destructive(name: impl Into<String>) -> Self {
        Self::new(name, SafetyClass::Destructive)
    }

    fn new(name: impl Into<String>, safety: SafetyClass) -> Self {
        Self {
            name: name.into(),
            safety,
            requires_confirmation: matches!(safety, SafetyClass::Destructive),
            display: DisplayFlags { visible_in_chat: true, ..DisplayFlags::default() },
            streaming: false,
            exploratory: false,
            breaks_exploratory_streak: true,
            visible_to: None,
            plugin: None,
            form_schema: None,
        }
    }

    pub fn with_display(mut self, display: DisplayFlags) -> Self {
        self.display = display;
        self
    }

    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.requires_confirmation = required;
        self
    }

    pub fn exploratory(mut self) -> Self {
        self.exploratory = true;
        self
    }

    /// Opt out of breaking the exploratory streak.
    pub fn keeps_exploratory_streak(mut self) -> Self {
        self.breaks_exploratory_streak = false;
        self
    }

    pub fn with_form_schema(mut self, schema: Value) -> Self {
        self.form_schema = Some(schema);
        self
    }

    pub fn with_plugin(mut self, plugin: PluginName) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn visible_to(mut self, agents: impl IntoIterator<Item = String>) -> Self {
        self.visible_to = Some(agents.into_iter().collect());
        self
    }

    /// Visibility check: a tool with no restriction is visible to everyone.
    pub fn visible_to_agent(&self, agent: &str) -> bool {
        match &self.visible_to {
            Some(set) if !set.is_empty() => set.contains(agent),
            _ => true,
        }
    }
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
