// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless JSON-RPC 2.0 client over Unix-domain sockets.
//!
//! Wire format: newline-terminated JSON text, UTF-8. One request per
//! connection; the daemon may close the connection after responding.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod protocol;

pub use client::{RpcClient, DEFAULT_CALL_TIMEOUT};
pub use protocol::{
    read_response_value, validate_response, validate_socket_path, write_notification,
    write_request, RpcError, ValidResponse, DEFAULT_MAX_RESPONSE_BYTES, JSONRPC_VERSION,
    MAX_SOCKET_PATH_LEN,
};
