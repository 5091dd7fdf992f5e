// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable adapter runner for tests.
//!
//! `FakeRunner` records every invocation and plays back scripted outcomes
//! in order, falling back to a default success. An outcome can write files
//! into the workspace before returning, which is how tests fabricate step
//! output artifacts without a real LLM CLI.

use crate::runner::{AdapterError, AdapterResult, AdapterRunner, FailureReason, Invocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wave_core::StreamEvent;

/// A recorded invocation, for assertions.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub step_id: String,
    pub persona: Option<String>,
    pub binary: String,
    pub args: Vec<String>,
    pub workspace: std::path::PathBuf,
    pub env: Vec<(String, String)>,
}

/// One scripted invocation outcome.
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    pub result: AdapterResult,
    /// Workspace-relative files written before returning
    pub files: Vec<(String, String)>,
    /// Artificial runtime, for concurrency and cancellation tests
    pub delay: Duration,
}

impl ScriptedOutcome {
    /// Successful invocation reporting the given token usage.
    pub fn success(tokens: u64) -> Self {
        Self {
            result: AdapterResult {
                exit_code: Some(0),
                tokens_used: tokens,
                duration_ms: 5,
                tool_calls: vec![],
                stdout_last_error: None,
                failure_reason: FailureReason::Ok,
            },
            files: vec![],
            delay: Duration::ZERO,
        }
    }

    /// Non-zero exit.
    pub fn exit_error(code: i32) -> Self {
        let mut outcome = Self::success(0);
        outcome.result.exit_code = Some(code);
        outcome.result.failure_reason = FailureReason::ExitNonzero;
        outcome
    }

    /// Write a workspace-relative file before returning.
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.result.tokens_used = tokens;
        self
    }
}

/// In-memory adapter runner with scripted outcomes.
#[derive(Clone, Default)]
pub struct FakeRunner {
    script: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
    calls: Arc<Mutex<Vec<FakeCall>>>,
    /// Per-step overrides keyed by step id, matched before the queue
    per_step: Arc<Mutex<Vec<(String, ScriptedOutcome)>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome (FIFO across all steps).
    pub fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Script every invocation of a given step id. Scripting the same step
    /// again replaces the previous outcome.
    pub fn on_step(&self, step_id: &str, outcome: ScriptedOutcome) {
        let mut per_step = self.per_step.lock();
        per_step.retain(|(id, _)| id != step_id);
        per_step.push((step_id.to_string(), outcome));
    }

    /// All invocations observed so far.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    /// Invocations of one step.
    pub fn calls_for(&self, step_id: &str) -> Vec<FakeCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.step_id == step_id)
            .collect()
    }

    fn next_outcome(&self, step_id: &str) -> ScriptedOutcome {
        if let Some((_, outcome)) = self
            .per_step
            .lock()
            .iter()
            .find(|(id, _)| id == step_id)
        {
            return outcome.clone();
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedOutcome::success(100))
    }
}

#[async_trait]
impl AdapterRunner for FakeRunner {
    async fn invoke(
        &self,
        invocation: Invocation,
        _events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<AdapterResult, AdapterError> {
        self.calls.lock().push(FakeCall {
            step_id: invocation.step_id.to_string(),
            persona: invocation.persona.clone(),
            binary: invocation.binary.clone(),
            args: invocation.args.clone(),
            workspace: invocation.workspace.clone(),
            env: invocation.env.clone(),
        });

        let outcome = self.next_outcome(invocation.step_id.as_str());

        if !outcome.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(outcome.delay) => {}
                _ = cancel.cancelled() => {
                    let mut result = outcome.result.clone();
                    result.failure_reason = FailureReason::Cancelled;
                    result.exit_code = None;
                    return Ok(result);
                }
            }
        }

        for (rel_path, content) in &outcome.files {
            let path = invocation.workspace.join(rel_path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
        }

        Ok(outcome.result)
    }
}
