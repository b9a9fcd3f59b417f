// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Telemetry probe for ACP agents.
//!
//! Starts the agent, opens a session and drives a fixed six-prompt
//! conversation through it, then checks whether the token usage the agent
//! reported (`session/prompt` usage and `usage_update` notifications)
//! behaves like current-context accounting: growth across turns, shrinkage
//! after `/compact`, and agreement with the agent's own `/context` report.
//! Results are printed as a console report; see [`report`].

pub mod analysis;
pub mod config;
pub mod context;
pub mod error;
pub mod report;
pub mod scenarios;
pub mod session;
pub mod turn;

use std::io::Write;

use tracing::{error, info, warn};
use tp_rpc::{AcpConnection, AgentProcess, StderrLog};

pub use config::{Cli, HarnessConfig};
pub use error::HarnessError;
pub use report::{Outcome, Reporter, Tally};
pub use session::{ProbeSession, SessionOptions};
pub use turn::TurnResult;

/// Run the whole probe against an already connected agent.
pub async fn probe<W: Write>(
    conn: &AcpConnection,
    stderr: Option<&StderrLog>,
    options: SessionOptions,
    report: &mut Reporter<W>,
) -> Result<Vec<TurnResult>, HarnessError> {
    let mut session = ProbeSession::establish(conn, options, stderr, report).await?;
    scenarios::run_all(&mut session, report).await
}

/// Start the configured agent, probe it and shut it down again.
///
/// Every failure is also written to the report before it is returned.
pub async fn run<W: Write>(config: &HarnessConfig, out: W) -> Result<Tally, HarnessError> {
    let mut report = Reporter::new(out);
    report.title()?;

    match run_agent(config, &mut report).await {
        Ok(()) => Ok(report.tally()),
        Err(err) => {
            error!(%err, "probe failed");
            let line = match &err {
                // Printed by the session step that failed.
                HarnessError::Setup { .. } => None,
                err if err.is_setup() => Some(format!("ERROR: {err}")),
                err => Some(format!("\nFATAL ERROR: {err}")),
            };
            if let Some(line) = line {
                // The error itself is what gets returned.
                let _ = report.line(line);
            }
            Err(err)
        }
    }
}

async fn run_agent<W: Write>(
    config: &HarnessConfig,
    report: &mut Reporter<W>,
) -> Result<(), HarnessError> {
    if let Some(artifact) = config.artifact_path() {
        if !artifact.exists() {
            return Err(HarnessError::MissingArtifact(artifact));
        }
    }
    let command = config.agent_command()?;

    report.line(format_args!("[*] Spawning agent: {}", config.agent_cmd))?;
    let (agent, conn) = AgentProcess::spawn(&command)?;
    tokio::time::sleep(config.startup_settle()).await;

    let result = probe(
        &conn,
        Some(agent.stderr()),
        SessionOptions::from_config(config),
        report,
    )
    .await;

    drop(conn);
    match agent.shutdown(config.shutdown_grace()).await {
        Ok(status) => info!(%status, "agent stopped"),
        Err(err) => warn!(%err, "failed to stop agent"),
    }
    result.map(|_| ())
}
