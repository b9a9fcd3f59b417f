// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for the telemetry probe binaries
//!
//! Both `telemetry-probe` and `mock-usage-agent` use stdout for something
//! other than logs (the human-readable report and the JSON-RPC channel
//! respectively), so console logging always goes to stderr. Passing
//! `--log-file` or `--log-dir` moves logs to a file instead.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Re-export Level for convenience
pub use tracing::Level;

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// CLI log level enum for clap integration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    #[default]
    Warn,
    /// Errors, warnings, and informational messages
    Info,
    /// All above plus debug information
    Debug,
    /// All above plus detailed tracing
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Logging flags shared by every binary in the workspace.
///
/// Use with `#[command(flatten)]`.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, help = "Log verbosity level (default: warn)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long, help = "Directory for log files (enables file logging)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Log filename
    #[arg(long, help = "Log filename (enables file logging)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Install the global subscriber.
    ///
    /// Logs go to stderr unless `--log-file` or `--log-dir` was given.
    pub fn init(self, component: &str, default_level: CliLogLevel) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or(default_level).into();
        let format = self.log_format.unwrap_or_default();

        if self.logs_to_file() {
            let log_path = self.resolve_log_path(component);
            init_to_file(component, level, format, &log_path)
        } else {
            init_to_stderr(component, level, format)
        }
    }

    pub fn logs_to_file(&self) -> bool {
        self.log_file.is_some() || self.log_dir.is_some()
    }

    /// Resolve the log file path.
    ///
    /// 1. An absolute `log_file` is used as is
    /// 2. A relative `log_file` is joined onto `log_dir` when one is given
    /// 3. Without `log_file`, `<log_dir>/<component>.log`
    /// 4. Otherwise the platform data directory
    pub fn resolve_log_path(&self, component: &str) -> PathBuf {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => PathBuf::from(file),
            (Some(file), Some(dir)) => Path::new(dir).join(file),
            (Some(file), None) => PathBuf::from(file),
            (None, Some(dir)) => Path::new(dir).join(format!("{component}.log")),
            (None, None) => standard_log_path(component),
        }
    }
}

/// Platform-specific default log location.
///
/// - Linux: ~/.local/share/telemetry-probe/<component>.log
/// - macOS: ~/Library/Logs/telemetry-probe/<component>.log
/// - Windows: %APPDATA%\telemetry-probe\<component>.log
pub fn standard_log_path(component: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    let mut path = {
        let mut base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        base.push("Library");
        base.push("Logs");
        base
    };

    #[cfg(not(target_os = "macos"))]
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    path.push("telemetry-probe");
    path.push(format!("{component}.log"));
    path
}

/// Console logging on stderr.
pub fn init_to_stderr(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Append logs to `log_path`, creating parent directories as needed.
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;

    init_with_writer(component, default_level, format, std::sync::Mutex::new(log_file))
}

/// Initialize logging with a custom writer.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(component, default_level)));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Filter directive applied when `RUST_LOG` is unset.
///
/// Crate targets use underscores, so `tp-harness` becomes `tp_harness`.
fn default_directive(component: &str, level: Level) -> String {
    format!("{},{}={}", level, component.replace('-', "_"), level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_log_level_maps_to_tracing_levels() {
        assert_eq!(Level::from(CliLogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Info), Level::INFO);
        assert_eq!(Level::from(CliLogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn default_level_is_warn() {
        assert_eq!(CliLogLevel::default(), CliLogLevel::Warn);
        assert_eq!(CliLogLevel::default().to_string(), "warn");
    }

    #[test]
    fn console_logging_without_file_flags() {
        let args = CliLoggingArgs::default();
        assert!(!args.logs_to_file());

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/probe".into()),
            ..Default::default()
        };
        assert!(args.logs_to_file());
    }

    #[test]
    fn log_path_resolution() {
        let dir_only = CliLoggingArgs {
            log_dir: Some("/tmp/logs".into()),
            ..Default::default()
        };
        assert_eq!(
            dir_only.resolve_log_path("telemetry-probe"),
            PathBuf::from("/tmp/logs/telemetry-probe.log")
        );

        let relative_file = CliLoggingArgs {
            log_dir: Some("/tmp/logs".into()),
            log_file: Some("run.log".into()),
            ..Default::default()
        };
        assert_eq!(
            relative_file.resolve_log_path("telemetry-probe"),
            PathBuf::from("/tmp/logs/run.log")
        );

        let absolute_file = CliLoggingArgs {
            log_dir: Some("/tmp/logs".into()),
            log_file: Some("/elsewhere/run.log".into()),
            ..Default::default()
        };
        assert_eq!(
            absolute_file.resolve_log_path("telemetry-probe"),
            PathBuf::from("/elsewhere/run.log")
        );
    }

    #[test]
    fn standard_path_names_the_component() {
        let path = standard_log_path("mock-usage-agent");
        let rendered = path.to_string_lossy();
        assert!(rendered.ends_with("mock-usage-agent.log"));
        assert!(rendered.contains("telemetry-probe"));
    }

    #[test]
    fn default_directive_uses_target_names() {
        assert_eq!(
            default_directive("tp-harness", Level::DEBUG),
            "DEBUG,tp_harness=DEBUG"
        );
    }

    #[test]
    fn file_logging_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("probe.log");
        // The global subscriber may already be set by another test; the file
        // must exist either way because it is opened before installation.
        let _ = init_to_file("tp-logging", Level::INFO, LogFormat::Plaintext, &path);
        assert!(path.exists());
    }
}
