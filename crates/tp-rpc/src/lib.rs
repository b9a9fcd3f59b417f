// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Newline-delimited JSON-RPC plumbing for talking to an ACP agent process.
//!
//! The agent is launched as a child process ([`AgentProcess`]) and spoken to
//! over its stdin/stdout through an [`AcpConnection`]. A background reader
//! task classifies every inbound line as a response, a server-initiated
//! request, or a notification ([`message::classify`]). Responses complete
//! the matching pending request, server requests are answered immediately
//! by a [`ServerRequestResponder`], and notifications are buffered until
//! the caller drains them.
//!
//! [`acp`] holds the handful of ACP payload shapes the telemetry probe
//! inspects (prompt usage, `usage_update`, `agent_message_chunk`).

pub mod acp;
pub mod connection;
pub mod error;
pub mod message;
pub mod process;

pub use connection::{AcpConnection, AutoResponder, ServerRequestResponder};
pub use error::RpcError;
pub use message::{Id, Incoming, JsonRpcError, Notification};
pub use process::{AgentCommand, AgentProcess, StderrLog};
