// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay.
//!
//! The logical tables of the store: `runs`, `step_states`, `artifacts`,
//! `cancellations`. [`MaterializedState::apply_event`] is the single reducer;
//! replaying the WAL over a snapshot reconstructs every table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wave_core::{Artifact, Event, Run, RunConfig, RunId, StepExecution, StepId, StepState};

/// Durable record of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub requested_at_ms: u64,
    pub force: bool,
}

/// Materialized state built from WAL replay.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedState {
    /// BTreeMaps keep iteration and serialization deterministic, so status
    /// output is stable and snapshot checksums verify after a round trip.
    pub runs: BTreeMap<RunId, Run>,
    /// run_id → step_id → latest execution record
    #[serde(default)]
    pub step_states: BTreeMap<RunId, BTreeMap<StepId, StepExecution>>,
    #[serde(default)]
    pub artifacts: BTreeMap<RunId, Vec<Artifact>>,
    #[serde(default)]
    pub cancellations: BTreeMap<RunId, CancellationRecord>,
}

impl MaterializedState {
    /// Get a run by ID or unique prefix (like git commit hashes).
    pub fn get_run(&self, id: &str) -> Option<&Run> {
        if let Some(run) = self.runs.get(id) {
            return Some(run);
        }

        let matches: Vec<_> = self
            .runs
            .iter()
            .filter(|(k, _)| k.as_str().starts_with(id))
            .collect();

        // Only return if exactly one match (unambiguous)
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    /// Step records for a run, in step-ID order.
    pub fn run_steps(&self, run_id: &str) -> impl Iterator<Item = &StepExecution> {
        self.step_states
            .get(run_id)
            .into_iter()
            .flat_map(|steps| steps.values())
    }

    /// A single step record.
    pub fn step(&self, run_id: &str, step_id: &str) -> Option<&StepExecution> {
        self.step_states.get(run_id)?.get(step_id)
    }

    /// Artifacts recorded for a run, optionally filtered by step.
    pub fn run_artifacts(&self, run_id: &str, step_id: Option<&str>) -> Vec<&Artifact> {
        self.artifacts
            .get(run_id)
            .into_iter()
            .flatten()
            .filter(|a| step_id.is_none_or(|s| a.step_id == *s))
            .collect()
    }

    /// Look up a specific artifact by (step, name).
    pub fn artifact(&self, run_id: &str, step_id: &str, name: &str) -> Option<&Artifact> {
        self.artifacts
            .get(run_id)?
            .iter()
            .find(|a| a.step_id == *step_id && a.name == name)
    }

    /// The cancellation flag for a run, if set.
    pub fn cancellation(&self, run_id: &str) -> Option<CancellationRecord> {
        self.cancellations.get(run_id).copied()
    }

    /// Apply an event to the state. The reducer must stay monotonic:
    /// replaying an already-applied suffix is a no-op.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::RunCreated {
                run_id,
                pipeline,
                input,
                tags,
                epoch_ms,
            } => {
                self.runs.entry(run_id.clone()).or_insert_with(|| {
                    let config = RunConfig::new(run_id.clone(), pipeline.clone())
                        .with_input(input.clone())
                        .with_tags(tags.clone());
                    Run::new_with_epoch_ms(config, *epoch_ms)
                });
            }

            Event::RunStarted { run_id, .. } => {
                // Fires on first start and on every resume; a replayed log
                // converges because the final RunFinished lands last.
                if let Some(run) = self.runs.get_mut(run_id) {
                    run.status = wave_core::RunStatus::Running;
                    run.completed_at_ms = None;
                    run.error = None;
                }
            }

            Event::RunFinished {
                run_id,
                status,
                error,
                epoch_ms,
            } => {
                if let Some(run) = self.runs.get_mut(run_id) {
                    run.finish(*status, error.clone(), *epoch_ms);
                }
            }

            Event::StepTransition {
                run_id,
                step_id,
                state,
                tokens_used,
                exit_code,
                error,
                epoch_ms,
                ..
            } => {
                let exec = self
                    .step_states
                    .entry(run_id.clone())
                    .or_default()
                    .entry(step_id.clone())
                    .or_insert_with(|| StepExecution::new(run_id.clone(), step_id.clone()));

                exec.transition(*state, *epoch_ms);
                if *tokens_used > 0 {
                    exec.tokens_used = *tokens_used;
                }
                if exit_code.is_some() {
                    exec.exit_code = *exit_code;
                }
                if error.is_some() {
                    exec.error.clone_from(error);
                }

                if let Some(run) = self.runs.get_mut(run_id) {
                    if *state == StepState::Running {
                        run.current_step = Some(step_id.clone());
                    }
                    if state.is_terminal() {
                        run.total_tokens = self
                            .step_states
                            .get(run_id)
                            .map(|steps| steps.values().map(|s| s.tokens_used).sum())
                            .unwrap_or(0);
                    }
                }
            }

            Event::ArtifactRecorded { artifact } => {
                let artifacts = self.artifacts.entry(artifact.run_id.clone()).or_default();
                // Replace a prior attempt's record for the same (step, name)
                artifacts.retain(|a| a.key() != artifact.key());
                artifacts.push(artifact.clone());
            }

            Event::CancelRequested {
                run_id,
                force,
                epoch_ms,
            } => {
                let record = self
                    .cancellations
                    .entry(run_id.clone())
                    .or_insert(CancellationRecord {
                        requested_at_ms: *epoch_ms,
                        force: *force,
                    });
                // Force upgrades a pending graceful request
                record.force = record.force || *force;
            }

            Event::CancelCleared { run_id, .. } => {
                self.cancellations.remove(run_id);
            }

            Event::Note { .. } => {}
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
