// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 framing and response validation.
//!
//! Requests and notifications are one JSON object plus `\n`. Responses are
//! parsed by incremental `serde_json` attempts on an accumulating buffer:
//! a parse failure before a complete payload just waits for more bytes,
//! bounded by the caller's timeout and the response-size cap.

use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const JSONRPC_VERSION: &str = "2.0";

/// Longest socket path accepted anywhere in the system (sun_path limit on
/// the platforms we care about).
pub const MAX_SOCKET_PATH_LEN: usize = 104;

/// Default cap on an accumulated response buffer: 10 MiB.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Client-visible RPC failures.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Socket file not found: {0}")]
    SocketNotFound(String),

    #[error("Permission denied opening socket: {0}")]
    PermissionDenied(String),

    #[error("Connection refused on socket: {0}")]
    ConnectionRefused(String),

    #[error("RPC timeout after {timeout_ms}ms calling {method:?}")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Socket closed with incomplete response")]
    IncompleteResponse,

    #[error("Response ID mismatch: sent {sent}, received {received}")]
    IdMismatch { sent: u64, received: Value },

    #[error("Invalid JSON-RPC response format: {0}")]
    InvalidResponse(String),

    #[error("RPC error (code {code}): {message}")]
    Remote { code: i64, message: String, data: Option<Value> },

    #[error("Response size exceeds maximum ({received} > {max} bytes)")]
    ResponseTooLarge { received: usize, max: usize },

    #[error("Invalid socket path {path:?}: {reason}")]
    InvalidSocketPath { path: String, reason: String },

    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Map a connect/read error onto the taxonomy for `path`.
    pub(crate) fn from_io(err: std::io::Error, path: &Path) -> Self {
        let display = path.display().to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => RpcError::SocketNotFound(display),
            std::io::ErrorKind::PermissionDenied => RpcError::PermissionDenied(display),
            std::io::ErrorKind::ConnectionRefused => RpcError::ConnectionRefused(display),
            _ => RpcError::Io(err),
        }
    }
}

/// Check the rules every socket path must satisfy: absolute and short
/// enough for `sun_path`.
pub fn validate_socket_path(path: &Path) -> Result<(), RpcError> {
    let display = path.display().to_string();
    if !path.is_absolute() {
        return Err(RpcError::InvalidSocketPath {
            path: display,
            reason: "must be absolute".to_string(),
        });
    }
    if display.len() > MAX_SOCKET_PATH_LEN {
        return Err(RpcError::InvalidSocketPath {
            path: display,
            reason: format!("exceeds {} bytes", MAX_SOCKET_PATH_LEN),
        });
    }
    Ok(())
}

/// Write `{"jsonrpc":"2.0","method":…,"params":…,"id":…}\n`.
///
/// `params` is omitted entirely when `None`.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: &str,
    params: Option<Value>,
    id: u64,
) -> std::io::Result<()> {
    let mut body = Map::new();
    body.insert("jsonrpc".to_string(), Value::String(JSONRPC_VERSION.to_string()));
    body.insert("method".to_string(), Value::String(method.to_string()));
    if let Some(params) = params {
        body.insert("params".to_string(), params);
    }
    body.insert("id".to_string(), Value::from(id));
    write_line(writer, &Value::Object(body)).await
}

/// Write a notification: same shape as a request but with no `id` field.
pub async fn write_notification<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: &str,
    params: Option<Value>,
) -> std::io::Result<()> {
    let mut body = Map::new();
    body.insert("jsonrpc".to_string(), Value::String(JSONRPC_VERSION.to_string()));
    body.insert("method".to_string(), Value::String(method.to_string()));
    if let Some(params) = params {
        body.insert("params".to_string(), params);
    }
    write_line(writer, &Value::Object(body)).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Accumulate bytes until the buffer parses as one JSON value.
///
/// Whitespace around the payload is ignored. Returns
/// [`RpcError::IncompleteResponse`] if the peer closes before a complete
/// payload arrives, [`RpcError::ResponseTooLarge`] once the buffer passes
/// `max_bytes`.
pub async fn read_response_value<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Value, RpcError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(RpcError::IncompleteResponse);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > max_bytes {
            return Err(RpcError::ResponseTooLarge { received: buf.len(), max: max_bytes });
        }

        let trimmed = trim_ascii_whitespace(&buf);
        if trimmed.is_empty() {
            continue;
        }
        // Parse failures just mean the payload is still arriving.
        if let Ok(value) = serde_json::from_slice::<Value>(trimmed) {
            return Ok(value);
        }
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// A response that passed schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidResponse {
    pub id: Value,
    /// `Ok(result)` or `Err((code, message, data))`.
    pub outcome: Result<Value, (i64, String, Option<Value>)>,
}

/// Validate the JSON-RPC 2.0 response schema.
///
/// Valid iff: top-level object; `jsonrpc == "2.0"`; `id` present; exactly
/// one of `result`/`error` present; an `error` is an object with numeric
/// `code` and string `message`.
pub fn validate_response(value: Value) -> Result<ValidResponse, RpcError> {
    let Value::Object(mut map) = value else {
        return Err(RpcError::InvalidResponse("not a JSON object".to_string()));
    };

    match map.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => return Err(RpcError::InvalidResponse("missing or wrong jsonrpc version".to_string())),
    }

    let Some(id) = map.remove("id") else {
        return Err(RpcError::InvalidResponse("missing id".to_string()));
    };

    let result = map.remove("result");
    let error = map.remove("error");
    match (result, error) {
        (Some(result), None) => Ok(ValidResponse { id, outcome: Ok(result) }),
        (None, Some(error)) => {
            let Value::Object(mut err) = error else {
                return Err(RpcError::InvalidResponse("error is not an object".to_string()));
            };
            let code = match err.get("code").and_then(Value::as_i64) {
                Some(code) => code,
                None => {
                    return Err(RpcError::InvalidResponse(
                        "error.code missing or not numeric".to_string(),
                    ))
                }
            };
            let message = match err.remove("message") {
                Some(Value::String(message)) => message,
                _ => {
                    return Err(RpcError::InvalidResponse(
                        "error.message missing or not a string".to_string(),
                    ))
                }
            };
            Ok(ValidResponse { id, outcome: Err((code, message, err.remove("data"))) })
        }
        (Some(_), Some(_)) => {
            Err(RpcError::InvalidResponse("both result and error present".to_string()))
        }
        (None, None) => {
            Err(RpcError::InvalidResponse("neither result nor error present".to_string()))
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
