// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter subprocess runner.
//!
//! Spawns the adapter binary in a new process group with a curated
//! environment, drains the NDJSON stream, and enforces the step deadline by
//! signalling the whole group: SIGTERM, a 5-second grace period, then
//! SIGKILL. Adapter binaries spawn their own subprocesses, so killing only
//! the direct child would leak descendants.

use crate::stream::StreamRecord;
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wave_core::{Clock, Permissions, RunId, StepId, StreamEvent, StreamState, SystemClock};
use wave_manifest::Adapter;

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// How much stderr to keep for diagnostics.
const STDERR_TAIL_BYTES: usize = 4096;

/// Errors from adapter invocation
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Environment problem; the step fails without retry
    #[error("failed to spawn '{binary}': {message}")]
    Spawn { binary: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream capture task failed: {0}")]
    Capture(String),
}

/// Why an invocation did not succeed (or `Ok` when it did).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Ok,
    Timeout,
    Cancelled,
    Signal,
    Contract,
    ExitNonzero,
    Spawn,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Ok => "ok",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Signal => "signal",
            FailureReason::Contract => "contract",
            FailureReason::ExitNonzero => "exit_nonzero",
            FailureReason::Spawn => "spawn",
        };
        write!(f, "{s}")
    }
}

/// A tool invocation extracted from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Structured result of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    pub exit_code: Option<i32>,
    pub tokens_used: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_last_error: Option<String>,
    pub failure_reason: FailureReason,
}

impl AdapterResult {
    pub fn succeeded(&self) -> bool {
        self.failure_reason == FailureReason::Ok
    }
}

/// A fully-resolved subprocess invocation.
///
/// The engine renders prompts, permissions, and the curated env before the
/// runner ever sees the step.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub run_id: RunId,
    pub step_id: StepId,
    pub persona: Option<String>,
    pub binary: String,
    pub args: Vec<String>,
    pub workspace: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Exit codes treated as success (from the adapter declaration)
    pub success_exit_codes: Vec<i32>,
}

/// Runs adapter subprocesses. The production implementation spawns real
/// processes; tests use `FakeRunner`.
#[async_trait]
pub trait AdapterRunner: Send + Sync {
    /// Invoke the adapter, forwarding stream heartbeats to `events`.
    ///
    /// Firing `cancel` takes the same SIGTERM/grace/SIGKILL path as a
    /// timeout and yields `failure_reason = Cancelled`.
    async fn invoke(
        &self,
        invocation: Invocation,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<AdapterResult, AdapterError>;
}

/// Build the argv for a headless claude-style invocation.
pub fn claude_argv(
    adapter: &Adapter,
    permissions: &Permissions,
    settings_path: &Path,
    prompt: &str,
) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        prompt.to_string(),
        "--output-format".to_string(),
        adapter.output_format.clone(),
        "--verbose".to_string(),
        "--settings".to_string(),
        settings_path.display().to_string(),
    ];
    if !permissions.allowed_tools.is_empty() {
        args.push("--allowed-tools".to_string());
        args.push(permissions.allowed_tools.join(","));
    }
    if !permissions.deny.is_empty() {
        args.push("--disallowed-tools".to_string());
        args.push(permissions.deny.join(","));
    }
    args
}

/// Production runner: real subprocesses in their own process groups.
#[derive(Clone, Default)]
pub struct ClaudeRunner;

impl ClaudeRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AdapterRunner for ClaudeRunner {
    async fn invoke(
        &self,
        invocation: Invocation,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<AdapterResult, AdapterError> {
        let start = Instant::now();

        tracing::debug!(
            run_id = %invocation.run_id,
            step_id = %invocation.step_id,
            binary = %invocation.binary,
            workspace = %invocation.workspace.display(),
            "spawning adapter"
        );

        let mut cmd = Command::new(&invocation.binary);
        cmd.args(&invocation.args)
            .current_dir(&invocation.workspace)
            .env_clear()
            .envs(invocation.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| AdapterError::Spawn {
            binary: invocation.binary.clone(),
            message: e.to_string(),
        })?;

        // The child leads its own process group (pgid == pid)
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collector = tokio::spawn(drain_stdout(
            stdout,
            events,
            invocation.run_id.clone(),
            invocation.step_id.clone(),
        ));
        let stderr_task = tokio::spawn(async move {
            let mut tail = Vec::new();
            if let Some(mut stderr) = stderr {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stderr.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
            tail
        });

        let (status, reason) = supervise(&mut child, pgid, invocation.timeout, &cancel).await?;

        let summary = collector
            .await
            .map_err(|e| AdapterError::Capture(e.to_string()))?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !stderr_tail.is_empty() {
            tracing::debug!(
                run_id = %invocation.run_id,
                step_id = %invocation.step_id,
                stderr = %String::from_utf8_lossy(&stderr_tail),
                "adapter stderr"
            );
        }

        let exit_code = status.code();
        let failure_reason = match reason {
            Some(reason) => reason,
            None => match exit_code {
                Some(code) if invocation.success_exit_codes.contains(&code) => FailureReason::Ok,
                Some(_) => FailureReason::ExitNonzero,
                // No exit code means the process died to a signal we didn't send
                None => FailureReason::Signal,
            },
        };

        let result = AdapterResult {
            exit_code,
            tokens_used: summary.tokens,
            duration_ms: start.elapsed().as_millis() as u64,
            tool_calls: summary.tool_calls,
            stdout_last_error: summary.last_error,
            failure_reason,
        };

        tracing::info!(
            run_id = %invocation.run_id,
            step_id = %invocation.step_id,
            exit_code = ?result.exit_code,
            tokens = result.tokens_used,
            elapsed_ms = result.duration_ms,
            failure = %result.failure_reason,
            "adapter finished"
        );

        Ok(result)
    }
}

enum KillPhase {
    Armed,
    Terminated,
    Killed,
}

/// Wait for the child, escalating through SIGTERM → grace → SIGKILL when the
/// deadline fires or cancellation is requested.
async fn supervise(
    child: &mut Child,
    pgid: Option<Pid>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(std::process::ExitStatus, Option<FailureReason>), AdapterError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut phase = KillPhase::Armed;
    let mut reason: Option<FailureReason> = None;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,

            _ = &mut deadline => match phase {
                KillPhase::Armed => {
                    reason = Some(FailureReason::Timeout);
                    signal_group(pgid, Signal::SIGTERM);
                    phase = KillPhase::Terminated;
                    deadline.as_mut().reset(tokio::time::Instant::now() + KILL_GRACE);
                }
                KillPhase::Terminated => {
                    signal_group(pgid, Signal::SIGKILL);
                    phase = KillPhase::Killed;
                    deadline.as_mut().reset(far_future());
                }
                KillPhase::Killed => {
                    deadline.as_mut().reset(far_future());
                }
            },

            _ = cancel.cancelled(), if matches!(phase, KillPhase::Armed) => {
                reason = Some(FailureReason::Cancelled);
                signal_group(pgid, Signal::SIGTERM);
                phase = KillPhase::Terminated;
                deadline.as_mut().reset(tokio::time::Instant::now() + KILL_GRACE);
            }
        }
    };

    Ok((status, reason))
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86400)
}

/// Signal the whole process group; descendants included.
fn signal_group(pgid: Option<Pid>, signal: Signal) {
    let Some(pgid) = pgid else {
        return;
    };
    if let Err(e) = killpg(pgid, signal) {
        // ESRCH means the group already exited; anything else is worth a log
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(pgid = %pgid, signal = %signal, error = %e, "killpg failed");
        }
    }
}

#[derive(Default)]
struct StdoutSummary {
    tokens: u64,
    tool_calls: Vec<ToolCall>,
    last_error: Option<String>,
}

/// Drain the NDJSON stream, accumulating usage and tool calls, forwarding
/// heartbeat events as records arrive.
async fn drain_stdout(
    stdout: Option<ChildStdout>,
    events: mpsc::Sender<StreamEvent>,
    run_id: RunId,
    step_id: StepId,
) -> StdoutSummary {
    let mut summary = StdoutSummary::default();
    let Some(stdout) = stdout else {
        return summary;
    };
    let clock = SystemClock;

    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(record) = StreamRecord::parse_line(&line) else {
            continue;
        };

        summary.tokens += record.tokens();
        if let Some(tool_use) = &record.tool_use {
            summary.tool_calls.push(ToolCall {
                name: tool_use.name.clone(),
                input: tool_use.input.clone(),
            });
        }
        if let Some(error) = record.result_error() {
            summary.last_error = Some(error.to_string());
        }

        // Lossy by design: a slow subscriber drops heartbeats, not output
        let _ = events.try_send(StreamEvent::heartbeat(
            run_id.clone(),
            step_id.clone(),
            StreamState::StreamActivity,
            clock.epoch_ms(),
        ));
    }

    summary
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
