// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless RPC client: one fresh connection per call.
//!
//! Settlement is structural: every path out of [`RpcClient::call`] drops
//! the connection, and the timeout wraps the whole exchange so a late
//! `data`/`close` cannot race a settled result.

use crate::protocol::{
    read_response_value, validate_response, validate_socket_path, write_notification,
    write_request, RpcError, DEFAULT_MAX_RESPONSE_BYTES,
};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

/// Default deadline for a full request/response exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Stateless JSON-RPC 2.0 client.
///
/// Request ids are unique within one client instance: a process-local
/// monotonically increasing counter.
pub struct RpcClient {
    next_id: AtomicU64,
    max_response_bytes: usize,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES }
    }

    /// Override the response-size cap (bytes).
    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    /// Send one request and wait for its response.
    ///
    /// Opens a fresh connection, writes the newline-terminated request,
    /// accumulates and validates the response, and checks the id echo.
    /// Returns the `result` field, or [`RpcError::Remote`] from `error`.
    pub async fn call(
        &self,
        socket_path: &Path,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        validate_socket_path(socket_path)?;
        let timeout = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        debug!(socket = %socket_path.display(), method, id, "rpc call");
        let exchange = self.exchange(socket_path, method, params, id);
        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Fire-and-forget notification (no `id`, no response expected).
    pub async fn notify(
        &self,
        socket_path: &Path,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<(), RpcError> {
        validate_socket_path(socket_path)?;
        let timeout = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);

        let send = async {
            let mut stream = UnixStream::connect(socket_path)
                .await
                .map_err(|e| RpcError::from_io(e, socket_path))?;
            write_notification(&mut stream, method, params).await?;
            // Half-close so daemons reading to EOF see the full frame.
            let _ = stream.shutdown().await;
            Ok(())
        };
        match tokio::time::timeout(timeout, send).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Connect-only health probe.
    pub async fn ping(&self, socket_path: &Path, timeout: Option<Duration>) -> Result<(), RpcError> {
        validate_socket_path(socket_path)?;
        let timeout = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        match tokio::time::timeout(timeout, UnixStream::connect(socket_path)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(RpcError::from_io(e, socket_path)),
            Err(_) => Err(RpcError::Timeout {
                method: "ping".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn exchange(
        &self,
        socket_path: &Path,
        method: &str,
        params: Option<Value>,
        id: u64,
    ) -> Result<Value, RpcError> {
        let mut stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| RpcError::from_io(e, socket_path))?;

        write_request(&mut stream, method, params, id).await?;

        let raw = read_response_value(&mut stream, self.max_response_bytes).await?;
        let response = validate_response(raw)?;

        // One request per connection: an id mismatch means a broken daemon.
        if response.id.as_u64() != Some(id) {
            return Err(RpcError::IdMismatch { sent: id, received: response.id });
        }

        match response.outcome {
            Ok(result) => Ok(result),
            Err((code, message, data)) => Err(RpcError::Remote { code, message, data }),
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
