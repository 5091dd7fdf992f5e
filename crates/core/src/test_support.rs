// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders shared across crates (feature `test-support`).

use crate::run::{Run, RunConfig, RunId};
use crate::step::{StepExecution, StepId, StepState};
use std::collections::BTreeMap;

/// Build a pending run with sensible defaults.
pub fn run(id: &str, pipeline: &str) -> Run {
    Run::new_with_epoch_ms(RunConfig::new(id, pipeline), 1_000_000)
}

/// Build a pending run with input vars.
pub fn run_with_input(id: &str, pipeline: &str, input: &[(&str, &str)]) -> Run {
    let input: BTreeMap<String, String> = input
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Run::new_with_epoch_ms(RunConfig::new(id, pipeline).with_input(input), 1_000_000)
}

/// Build a step execution in the given state, with a matching attempt count.
pub fn step_in_state(run_id: &str, step_id: &str, state: StepState) -> StepExecution {
    let mut exec = StepExecution::new(RunId::new(run_id), StepId::new(step_id));
    match state {
        StepState::Pending => {}
        StepState::Skipped | StepState::Cancelled => exec.transition(state, 1_000_100),
        other => {
            exec.transition(StepState::Running, 1_000_100);
            if other != StepState::Running {
                exec.transition(other, 1_000_200);
            }
        }
    }
    exec
}
