// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin manifest parsing and validation.
//!
//! Each plugin directory carries a TOML manifest declaring its tools,
//! agents, and (optionally) a background daemon. Validation happens once
//! at load; everything downstream can trust the parsed tree.

use crate::process::{DaemonConfig, HealthConfig, RestartConfig};
use axle_core::PluginName;
use axle_rpc::validate_socket_path;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Manifest load/validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("plugin name must not be empty")]
    EmptyName,

    #[error("duplicate tool {0:?}")]
    DuplicateTool(String),

    #[error("tool {tool:?} is background_rpc but the plugin declares no background block")]
    BackgroundRequired { tool: String },

    #[error("tool {tool:?} is background_rpc but has an empty method")]
    EmptyMethod { tool: String },

    #[error("tool {tool:?} is a subprocess tool but has an empty command")]
    EmptyCommand { tool: String },

    #[error("background socket path invalid: {0}")]
    SocketPath(String),

    #[error("invalid duration {value:?} for {field}: {reason}")]
    BadDuration { field: &'static str, value: String, reason: String },
}

/// Parse a duration string like "30s", "5m", "1h" into a Duration
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str.parse().map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        other => return Err(format!("unknown duration suffix: {}", other)),
    };

    Ok(Duration::from_secs(num * multiplier))
}

/// When the plugin's tools enter the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMode {
    /// Loaded into every session.
    #[default]
    Always,
    /// Loaded only when the session opts in by tag.
    Tagged,
}

/// How a declared tool reaches its implementation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolBackendDef {
    /// Routed to the plugin's daemon as a JSON-RPC call.
    BackgroundRpc { method: String },
    /// One subprocess per call; arguments arrive on stdin as JSON.
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// One tool declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(flatten)]
    pub backend: ToolBackendDef,
}

/// One agent declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentDef {
    pub name: String,
    pub description: String,
    /// Path to the system-prompt file, relative to the plugin directory.
    pub prompt: PathBuf,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    /// Agents permitted to delegate to this one.
    #[serde(default)]
    pub visible_from: Option<Vec<String>>,
}

/// Health-check block for a background daemon.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthDef {
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub max_failures: Option<u32>,
}

/// Background daemon block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackgroundDef {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub communication: Communication,
    #[serde(default)]
    pub health: Option<HealthDef>,
    #[serde(default)]
    pub startup_timeout: Option<String>,
    #[serde(default)]
    pub shutdown_timeout: Option<String>,
    #[serde(default)]
    pub max_restart_attempts: Option<u32>,
    #[serde(default)]
    pub restart_delay: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Communication {
    pub path: PathBuf,
}

/// A plugin's declarative manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub activation: ActivationMode,
    #[serde(default, rename = "tool")]
    pub tools: Vec<ToolDef>,
    #[serde(default, rename = "agent")]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub background: Option<BackgroundDef>,
}

impl PluginManifest {
    /// Parse and validate a manifest.
    pub fn from_toml(text: &str) -> Result<Self, ManifestError> {
        let manifest: PluginManifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn plugin_name(&self) -> PluginName {
        PluginName::new(&self.name)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ManifestError::DuplicateTool(tool.name.clone()));
            }
            match &tool.backend {
                ToolBackendDef::BackgroundRpc { method } => {
                    if self.background.is_none() {
                        return Err(ManifestError::BackgroundRequired { tool: tool.name.clone() });
                    }
                    if method.trim().is_empty() {
                        return Err(ManifestError::EmptyMethod { tool: tool.name.clone() });
                    }
                }
                ToolBackendDef::Subprocess { command, .. } => {
                    if command.trim().is_empty() {
                        return Err(ManifestError::EmptyCommand { tool: tool.name.clone() });
                    }
                }
            }
        }

        if let Some(background) = &self.background {
            validate_socket_path(&background.communication.path)
                .map_err(|e| ManifestError::SocketPath(e.to_string()))?;
            // Surface bad durations at load time, not at daemon start.
            background.daemon_config(&self.plugin_name())?;
        }

        Ok(())
    }

    /// Daemon configuration for the background block, if any.
    pub fn daemon_config(&self) -> Result<Option<DaemonConfig>, ManifestError> {
        match &self.background {
            Some(background) => Ok(Some(background.daemon_config(&self.plugin_name())?)),
            None => Ok(None),
        }
    }
}

impl BackgroundDef {
    fn daemon_config(&self, plugin: &PluginName) -> Result<DaemonConfig, ManifestError> {
        let mut config = DaemonConfig::new(
            plugin.clone(),
            self.command.clone(),
            self.communication.path.clone(),
        );
        config.args = self.args.clone();

        if let Some(value) = &self.startup_timeout {
            config.startup_timeout = duration_field("background.startup_timeout", value)?;
        }
        if let Some(value) = &self.shutdown_timeout {
            config.shutdown_grace = duration_field("background.shutdown_timeout", value)?;
        }

        let mut health = HealthConfig::default();
        if let Some(block) = &self.health {
            if let Some(value) = &block.interval {
                health.interval = duration_field("health.interval", value)?;
            }
            if let Some(value) = &block.timeout {
                health.timeout = duration_field("health.timeout", value)?;
            }
            if let Some(max) = block.max_failures {
                health.max_failures = max;
            }
        }
        config.health = health;

        let mut restart = RestartConfig::default();
        if let Some(max) = self.max_restart_attempts {
            restart.max_attempts = max;
        }
        if let Some(value) = &self.restart_delay {
            restart.delay = duration_field("background.restart_delay", value)?;
        }
        config.restart = restart;

        Ok(config)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ManifestError> {
    parse_duration(value).map_err(|reason| ManifestError::BadDuration {
        field,
        value: value.to_string(),
        reason,
    })
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
