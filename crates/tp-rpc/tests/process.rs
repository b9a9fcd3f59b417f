// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Subprocess tests against ordinary unix tools.

#![cfg(unix)]

use std::time::Duration;

use serde_json::json;
use tp_rpc::{AgentCommand, AgentProcess, RpcError};

fn sh(script: &str) -> AgentCommand {
    AgentCommand::from_argv(
        vec!["sh".into(), "-c".into(), script.into()],
        std::env::temp_dir(),
    )
    .unwrap()
}

#[tokio::test]
async fn echoing_agent_resolves_request_through_auto_reply() {
    // `cat` echoes our request back; it is seen as an agent request, answered
    // with `{}`, and that answer echoes back as the response to id 1.
    let cmd = AgentCommand::from_argv(vec!["cat".into()], std::env::temp_dir()).unwrap();
    let (agent, conn) = AgentProcess::spawn(&cmd).unwrap();
    assert!(agent.id().is_some());

    let result = conn
        .request("ping", json!({"n": 1}), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(result, json!({}));

    agent.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn stderr_is_captured_line_by_line() {
    let (agent, conn) = AgentProcess::spawn(&sh("echo first >&2; echo second >&2")).unwrap();

    let err = conn
        .request("initialize", json!({}), Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed { .. }));

    let stderr = agent.stderr().clone();
    let status = agent.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(status.success());
    assert_eq!(stderr.lines(), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(stderr.tail(1), vec!["second".to_string()]);
}

#[tokio::test]
async fn configured_variables_are_removed() {
    std::env::set_var("TP_RPC_TEST_MARKER", "present");
    let cmd = sh("echo \"${TP_RPC_TEST_MARKER-unset}\" >&2")
        .unset_env(["TP_RPC_TEST_MARKER".to_string()]);
    let (agent, _conn) = AgentProcess::spawn(&cmd).unwrap();
    let stderr = agent.stderr().clone();
    agent.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(stderr.lines(), vec!["unset".to_string()]);
}

#[tokio::test]
async fn stubborn_agent_is_killed_after_grace() {
    let (agent, _conn) = AgentProcess::spawn(&sh("trap '' TERM; sleep 30")).unwrap();
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = agent.shutdown(Duration::from_millis(300)).await.unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let cmd = AgentCommand::from_argv(
        vec!["definitely-not-a-real-agent-binary".into()],
        std::env::temp_dir(),
    )
    .unwrap();
    match AgentProcess::spawn(&cmd) {
        Err(RpcError::Spawn { program, .. }) => {
            assert_eq!(program, "definitely-not-a-real-agent-binary")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("spawn should fail"),
    }
}
