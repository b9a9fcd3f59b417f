// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Stdio entrypoint for the scripted usage-reporting agent

use anyhow::Context;
use clap::Parser;
use mock_usage_agent::UsageModel;
use tp_logging::{CliLogLevel, CliLoggingArgs};

#[derive(Debug, Parser)]
#[command(about = "Scripted ACP agent that reports token usage")]
struct Args {
    /// Report `used` as cumulative session throughput instead of current context
    #[arg(long)]
    cumulative: bool,

    /// Tokens attributed to the system prompt on every call
    #[arg(long, default_value_t = UsageModel::default().system_prompt_tokens)]
    system_prompt_tokens: i64,

    /// Context window size reported in usage updates
    #[arg(long, default_value_t = UsageModel::default().context_window)]
    context_window: i64,

    /// Ask the client for permission before answering each prompt
    #[arg(long)]
    ask_permission: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.logging.init("mock-usage-agent", CliLogLevel::Warn)?;

    let model = UsageModel {
        system_prompt_tokens: args.system_prompt_tokens,
        context_window: args.context_window,
        cumulative: args.cumulative,
        ask_permission: args.ask_permission,
        ..UsageModel::default()
    };
    tracing::info!(?model, "serving on stdio");

    mock_usage_agent::serve(tokio::io::stdin(), tokio::io::stdout(), model)
        .await
        .context("agent stdio failed")
}
