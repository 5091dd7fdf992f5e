// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run identifier and state machine.

use crate::clock::Clock;
use crate::step::StepId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

crate::define_id! {
    /// Unique identifier for a run instance.
    ///
    /// Each pipeline run gets a unique ID that can be used to track its state,
    /// query its status, and reference it in logs and events.
    #[derive(Default)]
    pub struct RunId;
}

/// Status of a run through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created but not yet picked up by the scheduler
    Pending,
    /// Scheduler is driving steps
    Running,
    /// Every terminal step is completed or skipped
    Completed,
    /// A must-pass step failed with retries exhausted
    Failed,
    /// Cancellation was observed and no step is running
    Cancelled,
}

impl RunStatus {
    /// Check if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Configuration for creating a new run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub id: RunId,
    pub pipeline: String,
    pub input: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

impl RunConfig {
    pub fn new(id: impl Into<RunId>, pipeline: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pipeline: pipeline.into(),
            input: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: BTreeMap<String, String>) -> Self {
        self.input = input;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A run instance: one execution of a pipeline with a given input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub pipeline: String,
    pub status: RunStatus,
    /// Most recently dispatched step (for status display)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    /// Sum of tokens_used across the most recent attempt of each step
    #[serde(default)]
    pub total_tokens: u64,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Run {
    /// Create a new pending run
    pub fn new(config: RunConfig, clock: &impl Clock) -> Self {
        Self::new_with_epoch_ms(config, clock.epoch_ms())
    }

    /// Create a new pending run with explicit epoch_ms (for WAL replay)
    pub fn new_with_epoch_ms(config: RunConfig, epoch_ms: u64) -> Self {
        Self {
            id: config.id,
            pipeline: config.pipeline,
            status: RunStatus::Pending,
            current_step: None,
            total_tokens: 0,
            started_at_ms: epoch_ms,
            completed_at_ms: None,
            error: None,
            input: config.input,
            tags: config.tags,
        }
    }

    /// Mark the run as finished with a terminal status.
    ///
    /// Non-terminal statuses are ignored.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>, epoch_ms: u64) {
        if !status.is_terminal() {
            return;
        }
        self.status = status;
        self.error = error;
        self.completed_at_ms = Some(epoch_ms);
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
