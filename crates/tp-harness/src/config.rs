// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Harness configuration: built-in defaults, an optional TOML file, then
//! command-line flags and `TP_*` environment variables, in increasing
//! precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tp_logging::CliLoggingArgs;
use tp_rpc::AgentCommand;

use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct HarnessConfig {
    /// Working directory of the agent and `cwd` of the session.
    pub project_dir: PathBuf,
    /// Command line that starts the agent, split like a POSIX shell would.
    pub agent_cmd: String,
    /// File that must exist (relative to `project_dir`) before the agent is
    /// started. Empty or absent disables the check.
    pub artifact: Option<PathBuf>,
    /// Variables removed from the agent's environment.
    pub unset_env: Vec<String>,
    /// Mode requested with `session/set_mode`.
    pub session_mode: String,
    pub request_timeout_secs: u64,
    pub prompt_timeout_secs: u64,
    /// Pause between spawning the agent and the first request.
    pub startup_settle_ms: u64,
    /// Pause after session setup before notifications are discarded.
    pub setup_settle_ms: u64,
    /// Pause after each prompt response for late notifications.
    pub trailing_notification_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            agent_cmd: "node dist/index.js".to_string(),
            artifact: Some(PathBuf::from("dist/index.js")),
            unset_env: vec!["CLAUDECODE".to_string()],
            session_mode: "bypassPermissions".to_string(),
            request_timeout_secs: 120,
            prompt_timeout_secs: 120,
            startup_settle_ms: 1_000,
            setup_settle_ms: 2_000,
            trailing_notification_ms: 500,
            shutdown_grace_secs: 5,
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The artifact to check for, resolved against the project directory.
    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.artifact
            .as_ref()
            .filter(|artifact| !artifact.as_os_str().is_empty())
            .map(|artifact| self.project_dir.join(artifact))
    }

    pub fn agent_command(&self) -> Result<AgentCommand, HarnessError> {
        let invalid = |reason: String| HarnessError::AgentCommand {
            command: self.agent_cmd.clone(),
            reason,
        };
        let argv = shell_words::split(&self.agent_cmd).map_err(|err| invalid(err.to_string()))?;
        let command = AgentCommand::from_argv(argv, self.project_dir.clone())
            .map_err(|err| invalid(err.to_string()))?;
        Ok(command.unset_env(self.unset_env.iter().cloned()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn startup_settle(&self) -> Duration {
        Duration::from_millis(self.startup_settle_ms)
    }

    pub fn setup_settle(&self) -> Duration {
        Duration::from_millis(self.setup_settle_ms)
    }

    pub fn trailing_notifications(&self) -> Duration {
        Duration::from_millis(self.trailing_notification_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Validate the token-usage telemetry reported by an ACP agent.
#[derive(Debug, Default, Parser)]
#[command(name = "telemetry-probe", version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "TP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project directory the agent runs in
    #[arg(long, env = "TP_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Command that starts the agent (default: `node dist/index.js`)
    #[arg(long, env = "TP_AGENT_CMD")]
    pub agent_cmd: Option<String>,

    /// File that must exist before the agent is started (default: dist/index.js)
    #[arg(long, env = "TP_ARTIFACT", conflicts_with = "skip_artifact_check")]
    pub artifact: Option<PathBuf>,

    /// Start the agent without checking for the build artifact
    #[arg(long)]
    pub skip_artifact_check: bool,

    /// Environment variables to remove from the agent's environment (comma separated)
    #[arg(long, env = "TP_UNSET_ENV", value_delimiter = ',')]
    pub unset_env: Option<Vec<String>>,

    /// Session mode to request after creating the session
    #[arg(long, env = "TP_SESSION_MODE")]
    pub session_mode: Option<String>,

    #[arg(long, env = "TP_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "TP_PROMPT_TIMEOUT_SECS")]
    pub prompt_timeout_secs: Option<u64>,

    #[arg(long, env = "TP_STARTUP_SETTLE_MS")]
    pub startup_settle_ms: Option<u64>,

    #[arg(long, env = "TP_SETUP_SETTLE_MS")]
    pub setup_settle_ms: Option<u64>,

    #[arg(long, env = "TP_TRAILING_NOTIFICATION_MS")]
    pub trailing_notification_ms: Option<u64>,

    #[arg(long, env = "TP_SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: Option<u64>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,
}

impl Cli {
    /// Layer the config file (if any) and the flags over the defaults.
    pub fn resolve(&self) -> Result<HarnessConfig, HarnessError> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_toml_file(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(dir) = &self.project_dir {
            config.project_dir = dir.clone();
        }
        if let Some(cmd) = &self.agent_cmd {
            config.agent_cmd = cmd.clone();
        }
        if self.skip_artifact_check {
            config.artifact = None;
        } else if let Some(artifact) = &self.artifact {
            config.artifact = Some(artifact.clone());
        }
        if let Some(vars) = &self.unset_env {
            config.unset_env = vars.iter().filter(|v| !v.is_empty()).cloned().collect();
        }
        if let Some(mode) = &self.session_mode {
            config.session_mode = mode.clone();
        }

        let overrides = [
            (self.request_timeout_secs, &mut config.request_timeout_secs),
            (self.prompt_timeout_secs, &mut config.prompt_timeout_secs),
            (self.startup_settle_ms, &mut config.startup_settle_ms),
            (self.setup_settle_ms, &mut config.setup_settle_ms),
            (self.trailing_notification_ms, &mut config.trailing_notification_ms),
            (self.shutdown_grace_secs, &mut config.shutdown_grace_secs),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value;
            }
        }

        Ok(config)
    }
}
