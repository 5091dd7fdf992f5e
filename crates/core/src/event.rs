// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types for the Wave system.
//!
//! Two event shapes exist:
//!
//! - [`Event`] is the rich, tagged record appended to the state store's WAL.
//!   Replaying it reconstructs the run/step/artifact tables.
//! - [`StreamEvent`] is the flat record published to subscribers (NDJSON to
//!   stdout, SSE to the dashboard). Every persisted [`Event`] maps to at most
//!   one [`StreamEvent`]; heartbeat stream events have no WAL counterpart.

use crate::artifact::Artifact;
use crate::run::{RunId, RunStatus};
use crate::step::{StepId, StepState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_empty_map<K, V>(map: &BTreeMap<K, V>) -> bool {
    map.is_empty()
}

/// Severity of a note event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSeverity {
    Info,
    Warning,
    Error,
}

/// Events that trigger state transitions in the system.
///
/// Serializes with `{"type": "event:name", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- run --
    #[serde(rename = "run:created")]
    RunCreated {
        run_id: RunId,
        pipeline: String,
        #[serde(default, skip_serializing_if = "is_empty_map")]
        input: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
        epoch_ms: u64,
    },

    #[serde(rename = "run:started")]
    RunStarted { run_id: RunId, epoch_ms: u64 },

    /// Run reached a terminal status
    #[serde(rename = "run:finished")]
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        epoch_ms: u64,
    },

    // -- step --
    /// A step moved to a new state.
    ///
    /// Writing this record updates `step_states` and appends the matching
    /// stream entry atomically (one WAL append).
    #[serde(rename = "step:transition")]
    StepTransition {
        run_id: RunId,
        step_id: StepId,
        state: StepState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        persona: Option<String>,
        #[serde(default)]
        message: String,
        #[serde(default)]
        tokens_used: u64,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        epoch_ms: u64,
    },

    // -- artifact --
    #[serde(rename = "artifact:recorded")]
    ArtifactRecorded { artifact: Artifact },

    // -- cancellation --
    #[serde(rename = "cancel:requested")]
    CancelRequested {
        run_id: RunId,
        force: bool,
        epoch_ms: u64,
    },

    /// Resume clears a stale cancellation flag so the run can re-execute
    #[serde(rename = "cancel:cleared")]
    CancelCleared { run_id: RunId, epoch_ms: u64 },

    // -- diagnostics --
    /// Informational, warning, or error message attached to a run or step
    #[serde(rename = "note")]
    Note {
        run_id: RunId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
        severity: NoteSeverity,
        message: String,
        epoch_ms: u64,
    },
}

impl Event {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &RunId {
        match self {
            Event::RunCreated { run_id, .. }
            | Event::RunStarted { run_id, .. }
            | Event::RunFinished { run_id, .. }
            | Event::StepTransition { run_id, .. }
            | Event::CancelRequested { run_id, .. }
            | Event::CancelCleared { run_id, .. }
            | Event::Note { run_id, .. } => run_id,
            Event::ArtifactRecorded { artifact } => &artifact.run_id,
        }
    }

    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::RunCreated { .. } => "run:created",
            Event::RunStarted { .. } => "run:started",
            Event::RunFinished { .. } => "run:finished",
            Event::StepTransition { .. } => "step:transition",
            Event::ArtifactRecorded { .. } => "artifact:recorded",
            Event::CancelRequested { .. } => "cancel:requested",
            Event::CancelCleared { .. } => "cancel:cleared",
            Event::Note { .. } => "note",
        }
    }

    /// Map this persisted event to its published form, if it has one.
    ///
    /// `id` is the WAL sequence number assigned at append time.
    pub fn to_stream_event(&self, id: u64) -> Option<StreamEvent> {
        let (state, step_id, persona, message, tokens, duration, epoch_ms) = match self {
            Event::RunCreated { epoch_ms, .. } => (
                StreamState::RunStarted,
                None,
                None,
                String::from("run created"),
                0,
                0,
                *epoch_ms,
            ),
            Event::RunStarted { epoch_ms, .. } => (
                StreamState::RunStarted,
                None,
                None,
                String::from("run started"),
                0,
                0,
                *epoch_ms,
            ),
            Event::RunFinished {
                status,
                error,
                epoch_ms,
                ..
            } => {
                let state = match status {
                    RunStatus::Completed => StreamState::RunCompleted,
                    RunStatus::Cancelled => StreamState::RunCancelled,
                    _ => StreamState::RunFailed,
                };
                let message = error.clone().unwrap_or_else(|| format!("run {status}"));
                (state, None, None, message, 0, 0, *epoch_ms)
            }
            Event::StepTransition {
                step_id,
                state,
                persona,
                message,
                tokens_used,
                duration_ms,
                error,
                epoch_ms,
                ..
            } => {
                let stream_state = match state {
                    StepState::Pending => return None,
                    StepState::Running => StreamState::Started,
                    StepState::Retrying => StreamState::Retrying,
                    StepState::Completed => StreamState::Completed,
                    StepState::Failed => StreamState::Failed,
                    StepState::Skipped => StreamState::Info,
                    StepState::Cancelled => StreamState::Cancelled,
                };
                let message = match (message.is_empty(), error) {
                    (false, _) => message.clone(),
                    (true, Some(e)) => e.clone(),
                    (true, None) => format!("step {state}"),
                };
                (
                    stream_state,
                    Some(step_id.clone()),
                    persona.clone(),
                    message,
                    *tokens_used,
                    *duration_ms,
                    *epoch_ms,
                )
            }
            Event::ArtifactRecorded { .. } => return None,
            Event::CancelCleared { epoch_ms, .. } => (
                StreamState::Info,
                None,
                None,
                String::from("cancellation flag cleared"),
                0,
                0,
                *epoch_ms,
            ),
            Event::CancelRequested {
                force, epoch_ms, ..
            } => (
                StreamState::Info,
                None,
                None,
                if *force {
                    String::from("force cancellation requested")
                } else {
                    String::from("cancellation requested")
                },
                0,
                0,
                *epoch_ms,
            ),
            Event::Note {
                step_id,
                severity,
                message,
                epoch_ms,
                ..
            } => {
                let state = match severity {
                    NoteSeverity::Info => StreamState::Info,
                    NoteSeverity::Warning => StreamState::Warning,
                    NoteSeverity::Error => StreamState::Error,
                };
                (
                    state,
                    step_id.clone(),
                    None,
                    message.clone(),
                    0,
                    0,
                    *epoch_ms,
                )
            }
        };

        Some(StreamEvent {
            id,
            run_id: self.run_id().clone(),
            step_id,
            timestamp: rfc3339(epoch_ms),
            state,
            persona,
            message,
            tokens_used: tokens,
            duration_ms: duration,
        })
    }
}

/// State tag of a published stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Started,
    Running,
    Completed,
    Failed,
    Retrying,
    Cancelled,
    Info,
    Warning,
    Error,
    StepProgress,
    StreamActivity,
    RunStarted,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

impl StreamState {
    /// Heartbeat states are published but never persisted.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, StreamState::StepProgress | StreamState::StreamActivity)
    }
}

/// The flat event record consumed by external UIs (§ NDJSON / SSE contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Monotonic per-run id (WAL sequence); 0 for unpersisted heartbeats
    #[serde(default)]
    pub id: u64,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// RFC3339 timestamp
    pub timestamp: String,
    pub state: StreamState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub message: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StreamEvent {
    /// Build a heartbeat event (not persisted, zero tokens/duration).
    pub fn heartbeat(
        run_id: RunId,
        step_id: StepId,
        state: StreamState,
        epoch_ms: u64,
    ) -> StreamEvent {
        StreamEvent {
            id: 0,
            run_id,
            step_id: Some(step_id),
            timestamp: rfc3339(epoch_ms),
            state,
            persona: None,
            message: String::new(),
            tokens_used: 0,
            duration_ms: 0,
        }
    }
}

/// Format epoch milliseconds as an RFC3339 timestamp (UTC).
pub fn rfc3339(epoch_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
