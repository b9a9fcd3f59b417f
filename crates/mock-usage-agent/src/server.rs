// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Agent side of the conversation: one request at a time, answered in order.

use std::collections::HashMap;
use std::io;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tp_rpc::acp::{self, methods, session_updates};
use tp_rpc::message::{self, Id, Incoming, JsonRpcError};

use crate::model::{CallUsage, Conversation, UsageModel, with_thousands};

const COMPACT_COMMAND: &str = "/compact";
const CONTEXT_COMMAND: &str = "/context";

/// Serve one client until its input stream ends.
pub async fn serve<R, W>(reader: R, writer: W, model: UsageModel) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    MockAgent::new(reader, writer, model).run().await
}

struct MockAgent<R, W> {
    lines: BufReader<R>,
    writer: W,
    model: UsageModel,
    sessions: HashMap<String, Conversation>,
    permission_requests: u64,
}

impl<R, W> MockAgent<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn new(reader: R, writer: W, model: UsageModel) -> Self {
        Self {
            lines: BufReader::new(reader),
            writer,
            model,
            sessions: HashMap::new(),
            permission_requests: 0,
        }
    }

    async fn run(mut self) -> io::Result<()> {
        while let Some(incoming) = self.next_message().await? {
            match incoming {
                Incoming::Request { id, method, params } => {
                    let reply = match self.handle_request(&method, params).await? {
                        Ok(result) => message::response(&id, result),
                        Err(error) => {
                            warn!(%id, %method, %error, "rejecting request");
                            message::error_response(&id, &error)
                        }
                    };
                    self.send(&reply).await?;
                }
                Incoming::Notification(notification) => {
                    debug!(method = %notification.method, "ignoring client notification");
                }
                Incoming::Response { id, .. } => {
                    debug!(%id, "ignoring unsolicited response");
                }
            }
        }
        info!("client closed the connection");
        Ok(())
    }

    /// Next classifiable message, or `None` at end of input.
    async fn next_message(&mut self) -> io::Result<Option<Incoming>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.lines.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => match message::classify(value) {
                    Some(incoming) => return Ok(Some(incoming)),
                    None => debug!("skipping unclassifiable message"),
                },
                Err(err) => warn!(%err, "skipping malformed line"),
            }
        }
    }

    async fn send(&mut self, value: &Value) -> io::Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    async fn handle_request(
        &mut self,
        method: &str,
        params: Value,
    ) -> io::Result<Result<Value, JsonRpcError>> {
        let result = match method {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": acp::PROTOCOL_VERSION,
                "agentCapabilities": { "loadSession": false },
            })),
            methods::SESSION_NEW => {
                let session_id = uuid::Uuid::new_v4().to_string();
                info!(%session_id, "new session");
                self.sessions
                    .insert(session_id.clone(), Conversation::new(self.model.clone()));
                Ok(json!({ "sessionId": session_id }))
            }
            methods::SESSION_SET_MODE => self.session_id(&params).map(|session_id| {
                let mode = params.get("modeId").and_then(Value::as_str).unwrap_or_default();
                info!(%session_id, mode, "mode set");
                json!({})
            }),
            methods::SESSION_PROMPT => match self.session_id(&params) {
                Ok(session_id) => return self.prompt(session_id, &params).await,
                Err(error) => Err(error),
            },
            other => Err(JsonRpcError::method_not_found(other)),
        };
        Ok(result)
    }

    fn session_id(&self, params: &Value) -> Result<String, JsonRpcError> {
        let session_id = params
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "missing sessionId"))?;
        if self.sessions.contains_key(session_id) {
            Ok(session_id.to_string())
        } else {
            Err(JsonRpcError::new(
                JsonRpcError::INVALID_PARAMS,
                format!("unknown session {session_id}"),
            ))
        }
    }

    async fn prompt(
        &mut self,
        session_id: String,
        params: &Value,
    ) -> io::Result<Result<Value, JsonRpcError>> {
        let text = prompt_text(params);
        info!(%session_id, prompt = %text, "prompt");

        if self.model.ask_permission && !self.ask_permission(&session_id).await? {
            return Ok(Ok(json!({ "stopReason": "cancelled" })));
        }

        let Some(convo) = self.sessions.get_mut(&session_id) else {
            return Ok(Err(JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "session vanished")));
        };
        let (reply, usage) = match text.trim() {
            COMPACT_COMMAND => (
                "Conversation compacted.".to_string(),
                Some(convo.compact()),
            ),
            // Answered locally without a model call.
            CONTEXT_COMMAND => (
                format!(
                    "Context Usage: {} / {} tokens",
                    with_thousands(convo.context_tokens()),
                    with_thousands(convo.model().context_window)
                ),
                None,
            ),
            _ => {
                let reply = crate::model::answer(&text);
                let usage = convo.exchange(&text, &reply);
                (reply, Some(usage))
            }
        };
        let snapshot = convo.snapshot();

        self.send(&session_update(
            &session_id,
            json!({
                "sessionUpdate": session_updates::AGENT_MESSAGE_CHUNK,
                "content": { "type": "text", "text": reply },
            }),
        ))
        .await?;
        self.send(&session_update(
            &session_id,
            json!({
                "sessionUpdate": session_updates::USAGE_UPDATE,
                "used": snapshot.used,
                "size": snapshot.size,
                "cost": { "amount": snapshot.cost_usd, "currency": "USD" },
            }),
        ))
        .await?;

        let mut result = json!({ "stopReason": "end_turn" });
        if let Some(usage) = usage {
            result["usage"] = usage_json(&usage);
        }
        Ok(Ok(result))
    }

    /// Ask the client for permission and wait for its answer.
    async fn ask_permission(&mut self, session_id: &str) -> io::Result<bool> {
        self.permission_requests += 1;
        let id = Id::Str(format!("perm-{}", self.permission_requests));
        let request = message::request(
            &id,
            methods::REQUEST_PERMISSION,
            json!({
                "sessionId": session_id,
                "toolCall": { "toolCallId": format!("tool-{}", self.permission_requests), "title": "Answer prompt" },
                "options": [
                    { "optionId": "allow-always", "name": "Always allow", "kind": "allow_always" },
                    { "optionId": "allow", "name": "Allow", "kind": "allow_once" },
                    { "optionId": "reject", "name": "Reject", "kind": "reject_once" },
                ],
            }),
        );
        self.send(&request).await?;

        while let Some(incoming) = self.next_message().await? {
            match incoming {
                Incoming::Response { id: reply_id, outcome } if reply_id == id => {
                    let granted = outcome
                        .as_ref()
                        .ok()
                        .and_then(|result| result.pointer("/outcome/outcome"))
                        .and_then(Value::as_str)
                        == Some("selected");
                    info!(%id, granted, "permission answered");
                    return Ok(granted);
                }
                other => warn!(?other, "unexpected message while awaiting permission"),
            }
        }
        Ok(false)
    }
}

fn prompt_text(params: &Value) -> String {
    params
        .get("prompt")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn session_update(session_id: &str, update: Value) -> Value {
    message::notification(
        methods::SESSION_UPDATE,
        json!({ "sessionId": session_id, "update": update }),
    )
}

fn usage_json(usage: &CallUsage) -> Value {
    json!({
        "inputTokens": usage.input_tokens,
        "outputTokens": usage.output_tokens,
        "cachedReadTokens": usage.cached_read_tokens,
        "cachedWriteTokens": 0,
        "totalTokens": usage.total(),
    })
}
