// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Scripted ACP agent that reports token usage.
//!
//! Answers `initialize`, `session/new`, `session/set_mode` and
//! `session/prompt` over newline-delimited JSON-RPC, emitting an
//! `agent_message_chunk` and a `usage_update` for every prompt. Simple sums
//! are answered, `/compact` shrinks the conversation and `/context` reports
//! current context occupancy as text. With [`UsageModel::cumulative`] set,
//! `used` reports session-wide throughput instead of context occupancy.

pub mod model;
mod server;

pub use model::{Conversation, UsageModel};
pub use server::serve;

use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

/// Start an agent on an in-memory pipe and return the client's end of it.
///
/// Must be called from within a Tokio runtime.
pub fn serve_in_memory(model: UsageModel) -> (DuplexStream, JoinHandle<std::io::Result<()>>) {
    let (client, agent) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(agent);
        serve(reader, writer, model).await
    });
    (client, handle)
}
