// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DAG ordering over pipeline steps (Kahn's algorithm).

use crate::pipeline::Step;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A dependency cycle, with the step IDs forming it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", trace.join(" -> "))]
pub struct CycleError {
    /// Steps still holding unresolved dependencies after the sort, sorted
    /// for deterministic messages.
    pub trace: Vec<String>,
}

/// Topological order of step IDs.
///
/// Ties are broken by declaration order so the plan is stable across runs.
pub fn topo_order(steps: &[Step]) -> Result<Vec<String>, CycleError> {
    let mut order = Vec::with_capacity(steps.len());
    for layer in layers(steps)? {
        order.extend(layer);
    }
    Ok(order)
}

/// Topological layers: steps in a layer are mutually independent and only
/// depend on earlier layers. Used by the dry-run plan.
pub fn topo_layers(steps: &[Step]) -> Result<Vec<Vec<String>>, CycleError> {
    layers(steps)
}

fn layers(steps: &[Step]) -> Result<Vec<Vec<String>>, CycleError> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let mut indegree: HashMap<&str, usize> = steps
        .iter()
        .map(|s| {
            let degree = s
                .dependencies
                .iter()
                .filter(|d| ids.contains(d.as_str()))
                .count();
            (s.id.as_str(), degree)
        })
        .collect();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut resolved: HashSet<&str> = HashSet::new();

    while resolved.len() < steps.len() {
        let ready: Vec<&str> = steps
            .iter()
            .filter(|s| !resolved.contains(s.id.as_str()) && indegree[s.id.as_str()] == 0)
            .map(|s| s.id.as_str())
            .collect();

        if ready.is_empty() {
            let mut trace: Vec<String> = steps
                .iter()
                .filter(|s| !resolved.contains(s.id.as_str()))
                .map(|s| s.id.clone())
                .collect();
            trace.sort();
            return Err(CycleError { trace });
        }

        for id in &ready {
            resolved.insert(id);
            for step in steps {
                if step.dependencies.iter().any(|d| d == id) {
                    if let Some(d) = indegree.get_mut(step.id.as_str()) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
        layers.push(ready.into_iter().map(String::from).collect());
    }

    Ok(layers)
}

#[cfg(test)]
#[path = "dag_tests.rs"]
mod tests;
