// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session setup and the per-prompt capture loop.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use tp_rpc::acp::{self, methods, InitializeResponse, NewSessionResponse};
use tp_rpc::{AcpConnection, JsonRpcError, RpcError, StderrLog};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::report::{Reporter, truncate};
use crate::turn::TurnResult;

/// Wait before dumping stderr after a failed `session/new`, so the agent's
/// last words make it into the buffer.
const STDERR_GRACE: Duration = Duration::from_secs(1);
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub cwd: PathBuf,
    pub mode: String,
    pub request_timeout: Duration,
    pub prompt_timeout: Duration,
    pub setup_settle: Duration,
    pub trailing_notifications: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &HarnessConfig) -> Self {
        let cwd = std::fs::canonicalize(&config.project_dir)
            .unwrap_or_else(|_| config.project_dir.clone());
        Self {
            cwd,
            mode: config.session_mode.clone(),
            request_timeout: config.request_timeout(),
            prompt_timeout: config.prompt_timeout(),
            setup_settle: config.setup_settle(),
            trailing_notifications: config.trailing_notifications(),
        }
    }
}

/// Separate a JSON-RPC error answer, which callers report, from transport
/// failures, which abort the run.
fn split_remote(result: Result<Value, RpcError>) -> Result<Result<Value, JsonRpcError>, RpcError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(RpcError::Remote { error, .. }) => Ok(Err(error)),
        Err(other) => Err(other),
    }
}

/// An initialized session ready to take prompts.
pub struct ProbeSession<'c> {
    conn: &'c AcpConnection,
    session_id: String,
    options: SessionOptions,
    turns: usize,
}

impl<'c> ProbeSession<'c> {
    /// `initialize`, `session/new` and `session/set_mode`, then let startup
    /// notifications settle and discard them.
    pub async fn establish<W: Write>(
        conn: &'c AcpConnection,
        options: SessionOptions,
        stderr: Option<&StderrLog>,
        report: &mut Reporter<W>,
    ) -> Result<ProbeSession<'c>, HarnessError> {
        report.line("[*] Sending initialize...")?;
        let init = split_remote(
            conn.request(methods::INITIALIZE, acp::initialize_params(), options.request_timeout)
                .await,
        )?;
        let init = match init {
            Ok(result) => result,
            Err(error) => {
                report.line(format_args!("  ERROR: {error}"))?;
                return Err(HarnessError::Setup {
                    step: methods::INITIALIZE,
                    error,
                });
            }
        };
        let version = serde_json::from_value::<InitializeResponse>(init)
            .ok()
            .and_then(|init| init.protocol_version)
            .map_or_else(|| "unknown".to_string(), |v| v.to_string());
        info!(%version, "agent initialized");
        report.line(format_args!("  OK: protocol={version}"))?;

        report.line("[*] Creating new session...")?;
        let created = split_remote(
            conn.request(
                methods::SESSION_NEW,
                acp::new_session_params(&options.cwd),
                options.request_timeout,
            )
            .await,
        )?;
        let created = match created {
            Ok(result) => result,
            Err(error) => {
                report.line(format_args!("  ERROR: {error}"))?;
                if let Some(stderr) = stderr {
                    tokio::time::sleep(STDERR_GRACE).await;
                    report.line(format_args!("  STDERR ({} lines):", stderr.len()))?;
                    for line in stderr.tail(STDERR_TAIL_LINES) {
                        report.line(format_args!("    {line}"))?;
                    }
                }
                return Err(HarnessError::Setup {
                    step: methods::SESSION_NEW,
                    error,
                });
            }
        };
        let session: NewSessionResponse =
            serde_json::from_value(created).map_err(|source| RpcError::Decode {
                method: methods::SESSION_NEW.to_string(),
                source,
            })?;
        info!(session_id = %session.session_id, "session created");
        report.line(format_args!("  OK: sessionId={}", session.session_id))?;

        report.line(format_args!("[*] Setting {} mode...", options.mode))?;
        let mode = split_remote(
            conn.request(
                methods::SESSION_SET_MODE,
                acp::set_mode_params(&session.session_id, &options.mode),
                options.request_timeout,
            )
            .await,
        )?;
        match mode {
            Ok(_) => report.line("  OK")?,
            Err(error) => report.line(format_args!("  WARNING: set_mode failed: {error}"))?,
        }

        tokio::time::sleep(options.setup_settle).await;
        let discarded = conn.drain_notifications();
        debug!(count = discarded.len(), "discarded setup notifications");

        Ok(Self {
            conn,
            session_id: session.session_id,
            options,
            turns: 0,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send one prompt and capture everything the agent reported for it.
    ///
    /// An error answer still yields a turn; timeouts and a closed connection
    /// are returned as errors.
    pub async fn send_prompt<W: Write>(
        &mut self,
        text: &str,
        report: &mut Reporter<W>,
    ) -> Result<TurnResult, HarnessError> {
        self.turns += 1;
        let turn = self.turns;
        report.line(format_args!(
            "\n  [Turn {turn}] Sending: {}",
            truncate(text, 60)
        ))?;

        self.conn.drain_notifications();
        let outcome = split_remote(
            self.conn
                .request(
                    methods::SESSION_PROMPT,
                    acp::prompt_params(&self.session_id, text),
                    self.options.prompt_timeout,
                )
                .await,
        )?;
        if let Err(error) = &outcome {
            report.line(format_args!("    ERROR: {error}"))?;
        }

        tokio::time::sleep(self.options.trailing_notifications).await;
        let notifications = self.conn.drain_notifications();
        let result = TurnResult::new(turn, text, &outcome, &notifications);
        debug!(turn, notifications = notifications.len(), "turn captured");

        let usage = result.usage();
        report.line(format_args!(
            "    stop_reason={}, input={}, output={}, total={}",
            result.stop_reason().unwrap_or("none"),
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens
        ))?;
        report.line(format_args!(
            "    usage_updates: {}, final_used={}, final_size={}, final_cost=${:.6}",
            result.usage_updates().len(),
            result.final_used(),
            result.final_size(),
            result.final_cost()
        ))?;
        if !result.agent_text().is_empty() {
            report.line(format_args!(
                "    agent text: {}...",
                truncate(result.agent_text(), 100)
            ))?;
        }
        Ok(result)
    }
}
