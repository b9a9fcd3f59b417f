// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;
use tp_rpc::{JsonRpcError, RpcError};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{} not found. Build the agent first (e.g. `npm run build`).", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Failed to read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid agent command `{command}`: {reason}")]
    AgentCommand { command: String, reason: String },

    #[error("{step} failed: {error}")]
    Setup {
        step: &'static str,
        error: JsonRpcError,
    },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Failed to write report: {0}")]
    Report(#[from] std::io::Error),
}

impl HarnessError {
    /// Errors raised before the first scenario ran.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            HarnessError::MissingArtifact(_)
                | HarnessError::ConfigRead { .. }
                | HarnessError::ConfigParse { .. }
                | HarnessError::AgentCommand { .. }
                | HarnessError::Setup { .. }
                | HarnessError::Rpc(RpcError::Spawn { .. } | RpcError::EmptyCommand)
        )
    }
}
