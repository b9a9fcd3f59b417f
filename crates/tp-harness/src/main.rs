// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tp_harness::Cli;
use tp_logging::CliLogLevel;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.logging
        .clone()
        .init("telemetry-probe", CliLogLevel::Warn)
        .context("initializing logging")?;
    let config = cli.resolve().context("loading configuration")?;
    tracing::debug!(?config, "resolved configuration");

    match tp_harness::run(&config, std::io::stdout()).await {
        Ok(tally) => {
            tracing::info!(%tally, "probe finished");
            Ok(ExitCode::SUCCESS)
        }
        // Already written to the report.
        Err(_) => Ok(ExitCode::FAILURE),
    }
}
