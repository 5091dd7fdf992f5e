// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template variable assembly for step execution.
//!
//! Namespaces visible to exec sources and branch templates:
//! `{{ input.<name> }}` (run input), `{{ task }}` / `{{ task.<field> }}`
//! (matrix binding), plus `{{ run_id }}`, `{{ step_id }}`, `{{ pipeline }}`,
//! and `{{ workspace }}` once provisioned.

use crate::matrix::MatrixItem;
use std::collections::{BTreeMap, HashMap};
use wave_core::{RunId, StepId};

/// Base variables shared by every step of a run.
pub fn run_vars(
    run_id: &RunId,
    pipeline: &str,
    input: &BTreeMap<String, String>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("run_id".to_string(), run_id.to_string());
    vars.insert("pipeline".to_string(), pipeline.to_string());
    for (key, value) in input {
        vars.insert(format!("input.{}", key), value.clone());
    }
    vars
}

/// Extend run vars with the step identity and optional matrix binding.
pub fn step_vars(
    base: &HashMap<String, String>,
    step_id: &StepId,
    item: Option<&MatrixItem>,
) -> HashMap<String, String> {
    let mut vars = base.clone();
    vars.insert("step_id".to_string(), step_id.to_string());
    if let Some(item) = item {
        for (key, value) in item.bindings() {
            vars.insert(key, value);
        }
    }
    vars
}

#[cfg(test)]
#[path = "vars_tests.rs"]
mod tests;
