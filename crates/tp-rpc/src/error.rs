// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the agent connection

use std::time::Duration;

use thiserror::Error;

use crate::message::{Id, JsonRpcError};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Request {method} (id={id}) timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        method: String,
        id: Id,
        timeout: Duration,
    },

    #[error("Connection to the agent closed before {method} completed")]
    ConnectionClosed { method: String },

    #[error("{method} returned an error: {error}")]
    Remote { method: String, error: JsonRpcError },

    #[error("Failed to decode {method} result: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to spawn agent `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Agent command is empty")]
    EmptyCommand,
}

impl RpcError {
    /// The JSON-RPC error object when the agent answered with one.
    pub fn remote_error(&self) -> Option<&JsonRpcError> {
        match self {
            RpcError::Remote { error, .. } => Some(error),
            _ => None,
        }
    }
}
