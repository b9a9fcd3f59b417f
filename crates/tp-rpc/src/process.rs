// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Launching the agent under test and tearing it down again.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::AcpConnection;
use crate::error::RpcError;

/// How to launch the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Variables removed from the inherited environment.
    pub unset_env: Vec<String>,
}

impl AgentCommand {
    /// Build from an argv whose first element is the program.
    pub fn from_argv(argv: Vec<String>, cwd: PathBuf) -> Result<Self, RpcError> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or(RpcError::EmptyCommand)?;
        Ok(Self {
            program,
            args: argv.collect(),
            cwd,
            unset_env: Vec::new(),
        })
    }

    pub fn unset_env(mut self, vars: impl IntoIterator<Item = String>) -> Self {
        self.unset_env.extend(vars);
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &self.unset_env {
            cmd.env_remove(var);
        }
        cmd
    }
}

/// Lines the agent wrote to stderr, captured for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct StderrLog(Arc<Mutex<Vec<String>>>);

impl StderrLog {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// The last `n` lines.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.0.lock();
        lines[lines.len().saturating_sub(n)..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, line: String) {
        self.0.lock().push(line);
    }

    /// Drain `stream` line by line until EOF.
    pub fn capture<R>(&self, stream: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let log = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        let text = text.strip_suffix('\n').unwrap_or(&text);
                        let text = text.strip_suffix('\r').unwrap_or(text);
                        debug!(target: "agent_stderr", "{text}");
                        log.push(text.to_string());
                    }
                    Err(err) => {
                        warn!(%err, "failed to read agent stderr");
                        break;
                    }
                }
            }
        })
    }
}

/// A running agent subprocess.
///
/// The child is killed if this value is dropped without [`shutdown`](Self::shutdown).
pub struct AgentProcess {
    child: Child,
    program: String,
    stderr: StderrLog,
    stderr_task: JoinHandle<()>,
}

impl AgentProcess {
    /// Spawn the agent and connect to its stdio.
    pub fn spawn(command: &AgentCommand) -> Result<(Self, AcpConnection), RpcError> {
        let mut child = command.to_command().spawn().map_err(|source| RpcError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        info!(
            program = %command.program,
            args = ?command.args,
            pid = child.id(),
            "spawned agent"
        );

        let stdin = child.stdin.take().ok_or(RpcError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(RpcError::MissingPipe("stdout"))?;
        let stderr_pipe = child.stderr.take().ok_or(RpcError::MissingPipe("stderr"))?;

        let stderr = StderrLog::default();
        let stderr_task = stderr.capture(stderr_pipe);
        let connection = AcpConnection::new(stdout, stdin);

        Ok((
            Self {
                child,
                program: command.program.clone(),
                stderr,
                stderr_task,
            },
            connection,
        ))
    }

    pub fn stderr(&self) -> &StderrLog {
        &self.stderr
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Ask the agent to terminate, wait up to `grace`, then kill it.
    pub async fn shutdown(mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        if let Err(err) = terminate(&mut self.child) {
            warn!(%err, program = %self.program, "failed to signal agent");
        }

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    program = %self.program,
                    grace_secs = grace.as_secs_f64(),
                    "agent ignored termination; killing"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };

        // Let the drain task collect whatever the agent wrote while exiting.
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.stderr_task).await;
        debug!(%status, "agent exited");
        Ok(status)
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from),
        // Already reaped.
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_splits_program_and_args() {
        let cmd = AgentCommand::from_argv(
            vec!["node".into(), "dist/index.js".into()],
            PathBuf::from("/project"),
        )
        .unwrap()
        .unset_env(["CLAUDECODE".to_string()]);
        assert_eq!(cmd.program, "node");
        assert_eq!(cmd.args, vec!["dist/index.js".to_string()]);
        assert_eq!(cmd.unset_env, vec!["CLAUDECODE".to_string()]);
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = AgentCommand::from_argv(vec![], PathBuf::from(".")).unwrap_err();
        assert!(matches!(err, RpcError::EmptyCommand));
    }

    #[test]
    fn stderr_tail_returns_last_lines() {
        let log = StderrLog::default();
        for i in 0..30 {
            log.push(format!("line {i}"));
        }
        let tail = log.tail(20);
        assert_eq!(tail.len(), 20);
        assert_eq!(tail.first().map(String::as_str), Some("line 10"));
        assert_eq!(tail.last().map(String::as_str), Some("line 29"));
        assert_eq!(log.tail(100).len(), 30);
    }

    #[tokio::test]
    async fn stderr_capture_is_lossy_and_strips_newlines() {
        let log = StderrLog::default();
        let input: &[u8] = b"first\r\nsecond \xff\nlast-without-newline";
        log.capture(input).await.unwrap();
        assert_eq!(
            log.lines(),
            vec![
                "first".to_string(),
                "second \u{fffd}".to_string(),
                "last-without-newline".to_string()
            ]
        );
    }
}
