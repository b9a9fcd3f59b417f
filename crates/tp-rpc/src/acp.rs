// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The subset of Agent Client Protocol payloads the probe reads and writes.
//!
//! Counters are decoded leniently: a missing or `null` counter reads as
//! zero (or `None` where absence is reported separately) and a float is
//! truncated, so that one odd field never hides a whole update. Negative
//! values are preserved so callers can flag them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::message::Notification;

pub const PROTOCOL_VERSION: u32 = 1;

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SESSION_NEW: &str = "session/new";
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    pub const SESSION_PROMPT: &str = "session/prompt";
    pub const SESSION_UPDATE: &str = "session/update";
    pub const REQUEST_PERMISSION: &str = "session/request_permission";
    /// Older agents used a camel-cased method name for permission prompts.
    pub const LEGACY_REQUEST_PERMISSION: &str = "requestPermission";
}

pub mod session_updates {
    pub const USAGE_UPDATE: &str = "usage_update";
    pub const AGENT_MESSAGE_CHUNK: &str = "agent_message_chunk";
}

pub fn is_permission_request(method: &str) -> bool {
    method == methods::REQUEST_PERMISSION || method == methods::LEGACY_REQUEST_PERMISSION
}

fn lenient_count<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    Ok(lenient_opt_count(de)?.unwrap_or(0))
}

fn lenient_opt_count<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<Value>::deserialize(de)?;
    Ok(raw.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

fn lenient_amount<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    let raw = Option::<Value>::deserialize(de)?;
    Ok(raw.and_then(|v| v.as_f64()).unwrap_or(0.0))
}

/// Token counters carried by a `session/prompt` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptUsage {
    #[serde(default, deserialize_with = "lenient_count")]
    pub input_tokens: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub output_tokens: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub cached_read_tokens: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub cached_write_tokens: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_tokens: i64,
}

/// Result of `session/prompt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<PromptUsage>,
}

impl PromptResponse {
    /// Decode a prompt result, falling back to an empty response when the
    /// agent sent something unrecognizable.
    pub fn from_result(result: &Value) -> Self {
        match serde_json::from_value(result.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(%err, "unrecognized session/prompt result");
                Self::default()
            }
        }
    }

    pub fn usage(&self) -> PromptUsage {
        self.usage.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCost {
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// A `usage_update` session update: running context usage for the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageUpdate {
    /// Tokens currently occupying the context window.
    #[serde(default, deserialize_with = "lenient_opt_count")]
    pub used: Option<i64>,
    /// Context window capacity.
    #[serde(default, deserialize_with = "lenient_opt_count")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<UsageCost>,
}

impl UsageUpdate {
    pub fn used_or_zero(&self) -> i64 {
        self.used.unwrap_or(0)
    }

    pub fn size_or_zero(&self) -> i64 {
        self.size.unwrap_or(0)
    }

    pub fn cost_amount(&self) -> f64 {
        self.cost.as_ref().map(|c| c.amount).unwrap_or(0.0)
    }
}

/// The `update` payload of a session notification, reduced to what the
/// probe inspects.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Usage(UsageUpdate),
    AgentMessageChunk { text: Option<String> },
    Other(String),
}

impl SessionUpdate {
    /// Extract the session update from a notification.
    ///
    /// Looks at `params.update.sessionUpdate` regardless of the notification
    /// method name.
    pub fn from_notification(notification: &Notification) -> Option<Self> {
        let update = notification.params.get("update")?;
        let kind = update.get("sessionUpdate")?.as_str()?;
        match kind {
            session_updates::USAGE_UPDATE => match serde_json::from_value(update.clone()) {
                Ok(usage) => Some(SessionUpdate::Usage(usage)),
                Err(err) => {
                    tracing::warn!(%err, "undecodable usage_update");
                    None
                }
            },
            session_updates::AGENT_MESSAGE_CHUNK => {
                let content = update.get("content");
                let text = content
                    .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
                    .map(|c| c.get("text").and_then(Value::as_str).unwrap_or_default().to_string());
                Some(SessionUpdate::AgentMessageChunk { text })
            }
            other => Some(SessionUpdate::Other(other.to_string())),
        }
    }
}

/// All `usage_update` payloads in arrival order.
pub fn usage_updates(notifications: &[Notification]) -> Vec<UsageUpdate> {
    notifications
        .iter()
        .filter_map(SessionUpdate::from_notification)
        .filter_map(|update| match update {
            SessionUpdate::Usage(usage) => Some(usage),
            _ => None,
        })
        .collect()
}

/// Concatenated text of all `agent_message_chunk` updates.
pub fn agent_text(notifications: &[Notification]) -> String {
    notifications
        .iter()
        .filter_map(SessionUpdate::from_notification)
        .filter_map(|update| match update {
            SessionUpdate::AgentMessageChunk { text } => text,
            _ => None,
        })
        .collect()
}

/// Pick the option a non-interactive client grants: `allow_once` when
/// offered, otherwise the first option, otherwise an empty id.
pub fn choose_permission_option(params: &Value) -> String {
    let options = params
        .get("options")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let option_id = |option: &Value| {
        option
            .get("optionId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    options
        .iter()
        .find(|o| o.get("kind").and_then(Value::as_str) == Some("allow_once"))
        .or_else(|| options.first())
        .map(option_id)
        .unwrap_or_default()
}

pub fn permission_selected(option_id: &str) -> Value {
    json!({ "outcome": { "outcome": "selected", "optionId": option_id } })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": { "readTextFile": true, "writeTextFile": true },
        },
    })
}

pub fn new_session_params(cwd: &std::path::Path) -> Value {
    json!({
        "cwd": cwd.to_string_lossy(),
        "mcpServers": [],
    })
}

pub fn set_mode_params(session_id: &str, mode_id: &str) -> Value {
    json!({
        "sessionId": session_id,
        "modeId": mode_id,
    })
}

pub fn prompt_params(session_id: &str, text: &str) -> Value {
    json!({
        "sessionId": session_id,
        "prompt": [{ "type": "text", "text": text }],
    })
}

/// Result of `session/new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    pub session_id: String,
}

/// Result of `initialize`; only the negotiated version is of interest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    #[serde(default)]
    pub protocol_version: Option<Value>,
}
