// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step execution record and state machine.

use crate::run::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Identifier of a DAG node within a pipeline.
    ///
    /// Matrix children use the `parent#index` form (e.g. `exec#0`).
    #[derive(Default)]
    pub struct StepId;
}

impl StepId {
    /// Build the ID of a matrix child instance.
    pub fn matrix_child(&self, index: usize) -> StepId {
        StepId::new(format!("{}#{}", self.0, index))
    }

    /// The parent step ID if this is a matrix child, None otherwise.
    pub fn matrix_parent(&self) -> Option<StepId> {
        self.0.rsplit_once('#').map(|(parent, _)| StepId::new(parent))
    }
}

/// State of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Waiting for dependencies
    Pending,
    /// Adapter subprocess is running
    Running,
    /// Contract failed with retries left; a fresh attempt will start
    Retrying,
    /// Step finished and its contract (if any) passed
    Completed,
    /// Step failed with retries exhausted
    Failed,
    /// Dependencies satisfied trivially on resume, never executed
    Skipped,
    /// Cancelled before reaching a terminal outcome
    Cancelled,
}

impl StepState {
    /// Check if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Skipped | StepState::Cancelled
        )
    }

    /// Check if this state satisfies a downstream dependency.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, StepState::Completed | StepState::Skipped)
    }

    /// Check whether `self → to` is a legal transition.
    ///
    /// A `Running` transition is legal from any state: besides normal
    /// dispatch it covers every resume path (failed and cancelled steps, a
    /// crashed-mid-run `Running`, and completed steps reset by a `from_step`
    /// override). Terminal states otherwise only change through a new
    /// attempt.
    pub fn can_transition(&self, to: StepState) -> bool {
        use StepState::*;
        match (self, to) {
            (_, Running) => true,
            (Pending, Skipped | Cancelled) => true,
            (Running, Completed | Failed | Retrying | Cancelled) => true,
            (Retrying, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Pending => write!(f, "pending"),
            StepState::Running => write!(f, "running"),
            StepState::Retrying => write!(f, "retrying"),
            StepState::Completed => write!(f, "completed"),
            StepState::Failed => write!(f, "failed"),
            StepState::Skipped => write!(f, "skipped"),
            StepState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Execution record for one step of a run.
///
/// The record tracks the latest attempt; the attempt counter is durable so
/// resume continues from one past the highest observed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub run_id: RunId,
    pub step_id: StepId,
    pub state: StepState,
    /// 1-based attempt number; equals prior `running` transitions + 1
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Coarse progress percentage in [0, 100]
    #[serde(default)]
    pub progress: u8,
}

impl StepExecution {
    /// Create a new pending execution record.
    pub fn new(run_id: RunId, step_id: StepId) -> Self {
        Self {
            run_id,
            step_id,
            state: StepState::Pending,
            attempt: 0,
            started_at_ms: None,
            completed_at_ms: None,
            tokens_used: 0,
            exit_code: None,
            error: None,
            progress: 0,
        }
    }

    /// Apply a state transition, updating attempt and timestamps.
    ///
    /// Illegal transitions are ignored (the WAL may replay stale events
    /// after a crash; the reducer must stay monotonic).
    pub fn transition(&mut self, to: StepState, epoch_ms: u64) {
        if !self.state.can_transition(to) {
            return;
        }
        match to {
            StepState::Running => {
                self.attempt += 1;
                self.started_at_ms = Some(epoch_ms);
                self.completed_at_ms = None;
                self.tokens_used = 0;
                self.exit_code = None;
                self.error = None;
                self.progress = 0;
            }
            s if s.is_terminal() => {
                self.completed_at_ms = Some(epoch_ms);
                self.progress = if s == StepState::Completed { 100 } else { self.progress };
            }
            _ => {}
        }
        self.state = to;
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
