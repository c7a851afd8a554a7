// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless per-call subprocess backend.
//!
//! The tool's arguments are written to the child's stdin as one JSON
//! document; stdout becomes the tool payload. The child is killed on
//! timeout or turn cancellation.

use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default wall-clock budget for one subprocess tool call.
pub const DEFAULT_SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool subprocess timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("tool subprocess cancelled")]
    Cancelled,

    #[error("tool subprocess exited with {status}: {stderr}")]
    NonZeroExit { status: std::process::ExitStatus, stderr: String },

    #[error("failed to encode tool arguments: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("subprocess I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run one subprocess tool call to completion.
pub async fn run_tool_subprocess(
    command: &str,
    args: &[String],
    input: &Value,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, SubprocessError> {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SubprocessError::Spawn { command: command.to_string(), source })?;

    if let Some(mut stdin) = child.stdin.take() {
        let body = serde_json::to_vec(input)?;
        stdin.write_all(&body).await?;
        stdin.shutdown().await?;
    }

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        () = cancel.cancelled() => {
            debug!(command, "subprocess tool cancelled");
            return Err(SubprocessError::Cancelled);
        }
        () = tokio::time::sleep(timeout) => {
            return Err(SubprocessError::Timeout { timeout_ms: timeout.as_millis() as u64 });
        }
    };

    if !output.status.success() {
        return Err(SubprocessError::NonZeroExit {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
