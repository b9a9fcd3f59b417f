// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! JSON-RPC 2.0 envelopes: classification of inbound lines and builders for
//! outbound ones.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON RPC Request Id
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    Str(String),
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{n}"),
            Id::Str(s) => write!(f, "{s}"),
            Id::Null => write!(f, "null"),
        }
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: "Method not found".into(),
            data: Some(json!({ "method": method })),
        }
    }
}

/// A notification as received from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// One classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Has `id` and no `method`: the answer to one of our requests.
    Response {
        id: Id,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Has both `id` and `method`: the agent is asking us something.
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    /// Has `method` and no `id`.
    Notification(Notification),
}

/// Classify a decoded line.
///
/// Returns `None` for anything that is not an object, has a non-string
/// `method`, an id that is neither number, string nor null, or carries
/// neither `id` nor `method`.
pub fn classify(value: Value) -> Option<Incoming> {
    let Value::Object(mut obj) = value else {
        return None;
    };

    let method = match obj.remove("method") {
        Some(Value::String(method)) => Some(method),
        Some(_) => return None,
        None => None,
    };
    let id = match obj.remove("id") {
        Some(raw) => Some(serde_json::from_value::<Id>(raw).ok()?),
        None => None,
    };
    let params = obj.remove("params").unwrap_or(Value::Null);

    match (id, method) {
        (Some(id), None) => Some(Incoming::Response {
            id,
            outcome: response_outcome(obj),
        }),
        (Some(id), Some(method)) => Some(Incoming::Request { id, method, params }),
        (None, Some(method)) => Some(Incoming::Notification(Notification { method, params })),
        (None, None) => None,
    }
}

fn response_outcome(mut obj: Map<String, Value>) -> Result<Value, JsonRpcError> {
    if let Some(result) = obj.remove("result") {
        return Ok(result);
    }
    match obj.remove("error") {
        Some(Value::Null) | None => Ok(Value::Null),
        Some(raw) => Err(serde_json::from_value::<JsonRpcError>(raw.clone())
            .unwrap_or_else(|_| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, raw.to_string()))),
    }
}

pub fn request(id: &Id, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

pub fn response(id: &Id, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn error_response(id: &Id, error: &JsonRpcError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": error,
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}
