// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay compaction.
//!
//! When a step's cumulative token usage crosses the configured share of the
//! context window, the summarizer persona is invoked over the step's
//! workspace to produce `checkpoint.md` (`## Summary`, optional
//! `## Decisions`). The checkpoint replaces the step's running context for
//! downstream consumers. Compaction failures never fail the step; the
//! caller downgrades them to warning events.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wave_adapters::{claude_argv, materialize_project_files, AdapterRunner, Invocation};
use wave_core::{Permissions, RunId, StepId};
use wave_manifest::Manifest;

/// File the summarizer must produce in the step workspace.
pub const CHECKPOINT_FILE: &str = "checkpoint.md";

const COMPACTION_PROMPT: &str = "The working context for this step has grown too large. \
Read the files under this workspace (notably output/) and write checkpoint.md at the \
workspace root with a '## Summary' section condensing the work so far and a \
'## Decisions' section listing decisions already made. Keep it under 500 words. \
Do not modify any other file.";

/// Errors from the compaction path (reported as warnings by the caller)
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("summarizer persona '{0}' is not defined")]
    SummarizerMissing(String),
    #[error("failed to read summarizer prompt: {0}")]
    Prompt(String),
    #[error("summarizer invocation failed: {0}")]
    Invoke(String),
    #[error("summarizer produced no usable checkpoint: {0}")]
    BadCheckpoint(String),
}

/// Threshold evaluation result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayDecision {
    pub utilization: f64,
    pub triggered: bool,
}

/// Decide whether a step's context should be compacted.
///
/// `trigger` is a fraction of the context window (default 0.8). Contexts
/// under `min_tokens` never compact, whatever the window size.
pub fn should_compact(
    cumulative_tokens: u64,
    min_tokens: u64,
    context_window: u64,
    trigger: f64,
) -> RelayDecision {
    let utilization = if context_window == 0 {
        0.0
    } else {
        cumulative_tokens as f64 / context_window as f64
    };
    RelayDecision {
        utilization,
        triggered: cumulative_tokens >= min_tokens && utilization >= trigger,
    }
}

/// A parsed checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub summary: String,
    pub decisions: Option<String>,
}

/// Parse `checkpoint.md`; the `## Summary` section is mandatory.
pub fn parse_checkpoint(content: &str) -> Option<Checkpoint> {
    let summary = section_body(content, "Summary")?;
    Some(Checkpoint {
        summary,
        decisions: section_body(content, "Decisions"),
    })
}

fn section_body(content: &str, section: &str) -> Option<String> {
    let mut body: Vec<&str> = Vec::new();
    let mut collecting = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("##") {
            if collecting {
                break;
            }
            collecting = rest.trim() == section;
            continue;
        }
        if collecting {
            body.push(line);
        }
    }
    if !collecting && body.is_empty() {
        return None;
    }
    let text = body.join("\n").trim().to_string();
    if text.is_empty() && !collecting {
        None
    } else {
        Some(text)
    }
}

/// Invoke the summarizer persona over the step workspace.
///
/// Returns the path of the produced checkpoint. The summarizer runs with the
/// persona's own (read-only by convention) permissions and the same curated
/// environment as the step.
#[allow(clippy::too_many_arguments)]
pub async fn compact<R: AdapterRunner>(
    runner: &R,
    manifest: &Manifest,
    project_root: &Path,
    run_id: &RunId,
    step_id: &StepId,
    workspace: &Path,
    env: Vec<(String, String)>,
    timeout: Duration,
    events: mpsc::Sender<wave_core::StreamEvent>,
    cancel: CancellationToken,
) -> Result<PathBuf, RelayError> {
    let summarizer_name = &manifest.runtime.relay.summarizer_persona;
    let (persona, adapter) = manifest
        .resolve_persona(summarizer_name)
        .ok_or_else(|| RelayError::SummarizerMissing(summarizer_name.clone()))?;

    let prompt_path = project_root.join(&persona.system_prompt_file);
    let system_prompt = std::fs::read_to_string(&prompt_path)
        .map_err(|e| RelayError::Prompt(format!("{}: {}", prompt_path.display(), e)))?;

    let settings_path = materialize_project_files(workspace, persona, adapter, &system_prompt)
        .map_err(|e| RelayError::Invoke(e.to_string()))?;

    let permissions = Permissions::merge(&adapter.default_permissions, &persona.permissions);
    let args = claude_argv(adapter, &permissions, &settings_path, COMPACTION_PROMPT);

    let invocation = Invocation {
        run_id: run_id.clone(),
        step_id: step_id.clone(),
        persona: Some(summarizer_name.clone()),
        binary: adapter.binary.clone(),
        args,
        workspace: workspace.to_path_buf(),
        env,
        timeout,
        success_exit_codes: adapter.success_exit_codes.clone(),
    };

    let result = runner
        .invoke(invocation, events, cancel)
        .await
        .map_err(|e| RelayError::Invoke(e.to_string()))?;

    if !result.succeeded() {
        return Err(RelayError::Invoke(format!(
            "summarizer exited with {}",
            result.failure_reason
        )));
    }

    let checkpoint_path = workspace.join(CHECKPOINT_FILE);
    let content = std::fs::read_to_string(&checkpoint_path)
        .map_err(|_| RelayError::BadCheckpoint("checkpoint.md was not written".to_string()))?;
    if parse_checkpoint(&content).is_none() {
        return Err(RelayError::BadCheckpoint(
            "checkpoint.md lacks a '## Summary' section".to_string(),
        ));
    }

    tracing::info!(
        run_id = %run_id,
        step_id = %step_id,
        "relay checkpoint written"
    );

    Ok(checkpoint_path)
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
