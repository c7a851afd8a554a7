// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic assembly of system reminders.
//!
//! A linear pipeline of producers, each keyed by a source label and each
//! emitting a (text, persist) pair; the injector wraps every reminder in
//! tags and appends them in fixed order, so tests can assert the exact
//! output. All reminders produced here are ephemeral.

use axle_core::{CallId, Reminder};
use std::time::Duration;

/// A produced reminder plus the label of its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledReminder {
    pub source: &'static str,
    pub reminder: Reminder,
}

impl LabeledReminder {
    fn ephemeral(source: &'static str, text: String) -> Self {
        Self { source, reminder: Reminder::ephemeral(text) }
    }
}

/// Everything the per-result pipeline looks at.
#[derive(Debug, Default)]
pub struct ReminderCtx {
    /// The tool's own reminder (checkpoint and streak text already
    /// merged in), with its declared persistence.
    pub tool_reminder: Option<Reminder>,
    /// Elapsed and budgeted turn time, when the turn has a max duration.
    pub time: Option<(Duration, Duration)>,
    /// Per-call cycle-detection warning.
    pub cycle_warning: Option<String>,
    /// Turn-wide pattern warning.
    pub global_warning: Option<String>,
    /// In-progress todo title (main agent only).
    pub focus: Option<String>,
}

/// Run every producer in fixed order.
pub fn assemble(ctx: &ReminderCtx) -> Vec<LabeledReminder> {
    let mut out = Vec::new();
    if let Some(reminder) = &ctx.tool_reminder {
        out.push(LabeledReminder { source: "tool", reminder: reminder.clone() });
    }
    if let Some((elapsed, max)) = ctx.time {
        if let Some(text) = time_reminder(elapsed, max) {
            out.push(LabeledReminder::ephemeral("time", text));
        }
    }
    if let Some(warning) = &ctx.cycle_warning {
        out.push(LabeledReminder::ephemeral("cycle", warning.clone()));
    }
    if let Some(warning) = &ctx.global_warning {
        out.push(LabeledReminder::ephemeral("global-pattern-detection", warning.clone()));
    }
    if let Some(title) = &ctx.focus {
        out.push(LabeledReminder::ephemeral("focus", format!("Current focus: {title}")));
    }
    out
}

/// Wrap each reminder in tags and append to the formatted body.
pub fn inject(body: &mut String, reminders: &[LabeledReminder]) {
    for labeled in reminders {
        body.push_str("\n\n<system-reminder>\n");
        body.push_str(&labeled.reminder.text);
        body.push_str("\n</system-reminder>");
    }
}

/// Elapsed-time reminder tiers. Thresholds are strict `>=` on the
/// percentage of the budget consumed; below 50% there is no reminder.
pub fn time_reminder(elapsed: Duration, max: Duration) -> Option<String> {
    if max.is_zero() {
        return None;
    }
    let percent = elapsed.as_secs_f64() / max.as_secs_f64() * 100.0;
    let remaining = format_mmss(max.saturating_sub(elapsed));

    if percent >= 100.0 {
        Some(format!(
            "Critical: the turn time budget is exhausted ({remaining} remaining). \
             Stop and summarize progress now."
        ))
    } else if percent >= 90.0 {
        Some(format!(
            "Urgent: over 90% of the turn time budget is used ({remaining} remaining). \
             Wrap up the current task."
        ))
    } else if percent >= 75.0 {
        Some(format!(
            "Warning: over 75% of the turn time budget is used ({remaining} remaining). \
             Prioritize finishing; avoid opening new threads of work."
        ))
    } else if percent >= 50.0 {
        Some(format!(
            "Over half of the turn time budget is used ({remaining} remaining). \
             Keep the remaining work focused."
        ))
    } else {
        None
    }
}

/// Remaining time as `m:ss`.
fn format_mmss(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Gentle nudge once the exploratory streak reaches the first threshold.
pub fn exploratory_gentle(streak: u32) -> String {
    format!(
        "You have made {streak} exploratory tool calls in a row. \
         Consider acting on what you have found."
    )
}

/// Stern nudge once the streak reaches the second threshold.
pub fn exploratory_stern(streak: u32) -> String {
    format!(
        "You have made {streak} exploratory tool calls in a row without acting. \
         Stop exploring and make concrete progress on the task."
    )
}

/// Replacement payload for a deduplicated result.
pub fn dedup_notice(prior: &CallId) -> String {
    format!("Result identical to earlier tool call {prior}; content omitted to save context.")
}

#[cfg(test)]
#[path = "reminders_tests.rs"]
mod tests;
