// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client side of a newline-delimited JSON-RPC connection.
//!
//! One task reads lines from the agent and dispatches them, one task owns
//! the write half so requests and automatic replies are never interleaved
//! within a line. Requests wait on a oneshot registered in the pending map
//! under their id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::acp;
use crate::error::RpcError;
use crate::message::{self, Id, Incoming, JsonRpcError, Notification};

type PendingMap = HashMap<Id, oneshot::Sender<Result<Value, JsonRpcError>>>;

/// Answers requests initiated by the agent.
pub trait ServerRequestResponder: Send + Sync {
    /// Produce the `result` for a request the agent sent us.
    fn respond(&self, method: &str, params: &Value) -> Value;
}

/// Grants every permission prompt and answers anything else with `{}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoResponder;

impl ServerRequestResponder for AutoResponder {
    fn respond(&self, method: &str, params: &Value) -> Value {
        if acp::is_permission_request(method) {
            acp::permission_selected(&acp::choose_permission_option(params))
        } else {
            Value::Object(Default::default())
        }
    }
}

struct Shared {
    pending: Mutex<PendingMap>,
    notifications: Mutex<Vec<Notification>>,
    // Only flipped while `pending` is locked so a request cannot register
    // after the reader has flushed the map.
    closed: AtomicBool,
}

pub struct AcpConnection {
    outgoing: mpsc::UnboundedSender<Value>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
    tasks: Vec<JoinHandle<()>>,
}

impl AcpConnection {
    /// Connect over an arbitrary byte stream pair, auto-answering agent
    /// requests with [`AutoResponder`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_responder(reader, writer, Arc::new(AutoResponder))
    }

    pub fn with_responder<R, W>(
        reader: R,
        writer: W,
        responder: Arc<dyn ServerRequestResponder>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let writer_task = tokio::spawn(write_loop(writer, outgoing_rx));
        let reader_task = tokio::spawn(read_loop(
            reader,
            shared.clone(),
            outgoing.clone(),
            responder,
        ));

        Self {
            outgoing,
            shared,
            next_id: AtomicI64::new(1),
            tasks: vec![reader_task, writer_task],
        }
    }

    /// Send a request and wait for its result.
    ///
    /// An error response becomes [`RpcError::Remote`]; no response within
    /// `timeout` becomes [`RpcError::Timeout`].
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(RpcError::ConnectionClosed {
                    method: method.to_string(),
                });
            }
            pending.insert(id.clone(), tx);
        }

        debug!(%id, method, "sending request");
        if self.outgoing.send(message::request(&id, method, params)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(RpcError::ConnectionClosed {
                method: method.to_string(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(RpcError::Remote {
                method: method.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed {
                method: method.to_string(),
            }),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    id,
                    timeout,
                })
            }
        }
    }

    /// [`request`](Self::request) followed by decoding the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        let result = self.request(method, params, timeout).await?;
        serde_json::from_value(result).map_err(|source| RpcError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Return and clear all notifications received so far.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.shared.notifications.lock())
    }

    /// Whether the agent's output stream has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for AcpConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_loop<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    while let Some(message) = outgoing.recv().await {
        line.clear();
        if let Err(err) = serde_json::to_writer(&mut line, &message) {
            warn!(%err, "failed to encode outgoing message");
            continue;
        }
        trace!("send: {}", String::from_utf8_lossy(&line));
        line.push(b'\n');
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        if let Err(err) = written.await {
            warn!(%err, "failed to write to agent; stopping writer");
            break;
        }
    }
}

async fn read_loop<R>(
    reader: R,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Value>,
    responder: Arc<dyn ServerRequestResponder>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "failed to read from agent");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!("recv: {line}");

        match serde_json::from_str::<Value>(line) {
            Ok(value) => dispatch(value, &shared, &outgoing, responder.as_ref()),
            Err(err) => debug!(%err, "skipping undecodable line from agent"),
        }
    }

    debug!("agent output closed");
    let mut pending = shared.pending.lock();
    shared.closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with ConnectionClosed.
    pending.clear();
}

fn dispatch(
    value: Value,
    shared: &Shared,
    outgoing: &mpsc::UnboundedSender<Value>,
    responder: &dyn ServerRequestResponder,
) {
    match message::classify(value) {
        Some(Incoming::Response { id, outcome }) => {
            let waiter = shared.pending.lock().remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(outcome);
                }
                None => warn!(%id, "response for unknown request id"),
            }
        }
        Some(Incoming::Request { id, method, params }) => {
            let result = responder.respond(&method, &params);
            debug!(%id, method, "answering agent request");
            let _ = outgoing.send(message::response(&id, result));
        }
        Some(Incoming::Notification(notification)) => {
            shared.notifications.lock().push(notification);
        }
        None => debug!("ignoring message that is neither request, response nor notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Connection wired to an in-memory peer the test drives by hand.
    fn connected() -> (AcpConnection, BufReader<DuplexStream>) {
        let (client_io, agent_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        (
            AcpConnection::new(client_read, client_write),
            BufReader::new(agent_io),
        )
    }

    async fn read_json(reader: &mut (impl AsyncBufReadExt + Unpin)) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn request_ids_start_at_one_and_increase() {
        let (conn, mut agent) = connected();
        let conn = Arc::new(conn);

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request("initialize", json!({}), Duration::from_secs(5)).await }
        });
        let sent = read_json(&mut agent).await;
        assert_eq!(sent["id"], json!(1));
        assert_eq!(sent["jsonrpc"], json!("2.0"));
        assert_eq!(sent["method"], json!("initialize"));
        agent
            .get_mut()
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"protocolVersion\":1}}\n")
            .await
            .unwrap();
        assert_eq!(first.await.unwrap().unwrap(), json!({"protocolVersion": 1}));

        let second = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request("session/new", json!({}), Duration::from_secs(5)).await }
        });
        let sent = read_json(&mut agent).await;
        assert_eq!(sent["id"], json!(2));
        agent
            .get_mut()
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"error\":{\"code\":-32000,\"message\":\"auth required\"}}\n")
            .await
            .unwrap();
        let err = second.await.unwrap().unwrap_err();
        assert_eq!(err.remote_error().map(|e| e.code), Some(-32000));
    }

    #[tokio::test]
    async fn notifications_are_buffered_until_drained() {
        let (conn, mut agent) = connected();
        agent
            .get_mut()
            .write_all(
                b"\n{\"jsonrpc\":\"2.0\",\"method\":\"session/update\",\"params\":{\"n\":1}}\nnot json\n{\"jsonrpc\":\"2.0\",\"method\":\"session/update\",\"params\":{\"n\":2}}\n",
            )
            .await
            .unwrap();

        // A round trip guarantees the reader has consumed everything before it.
        let pending = tokio::spawn(async move {
            let result = conn.request("ping", json!({}), Duration::from_secs(5)).await;
            (conn, result)
        });
        let sent = read_json(&mut agent).await;
        agent
            .get_mut()
            .write_all(format!("{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":null}}\n", sent["id"]).as_bytes())
            .await
            .unwrap();
        let (conn, result) = pending.await.unwrap();
        assert_eq!(result.unwrap(), Value::Null);

        let notes = conn.drain_notifications();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].params, json!({"n": 1}));
        assert_eq!(notes[1].params, json!({"n": 2}));
        assert!(conn.drain_notifications().is_empty());
    }

    #[tokio::test]
    async fn agent_requests_are_answered_automatically() {
        let (_conn, mut agent) = connected();
        agent
            .get_mut()
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":\"perm-1\",\"method\":\"session/request_permission\",\"params\":{\"options\":[{\"optionId\":\"always\",\"kind\":\"allow_always\"},{\"optionId\":\"once\",\"kind\":\"allow_once\"}]}}\n",
            )
            .await
            .unwrap();
        let reply = read_json(&mut agent).await;
        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "id": "perm-1",
                "result": {"outcome": {"outcome": "selected", "optionId": "once"}}
            })
        );

        agent
            .get_mut()
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"fs/read_text_file\",\"params\":{}}\n")
            .await
            .unwrap();
        let reply = read_json(&mut agent).await;
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 9, "result": {}}));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_agent_times_out() {
        let (conn, _agent) = connected();
        let err = conn
            .request("session/prompt", json!({}), Duration::from_secs(120))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { ref method, .. } if method == "session/prompt"));
        assert_eq!(
            err.to_string(),
            "Request session/prompt (id=1) timed out after 120s"
        );
    }

    #[tokio::test]
    async fn closed_stream_fails_pending_requests() {
        let (conn, agent) = connected();
        let conn = Arc::new(conn);
        let waiting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request("session/new", json!({}), Duration::from_secs(60)).await }
        });
        tokio::task::yield_now().await;
        drop(agent);

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed { .. }));
        assert!(conn.is_closed());

        let err = conn
            .request("session/prompt", json!({}), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed { .. }));
    }
}
