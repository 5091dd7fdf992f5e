// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn run_vars_namespace_input() {
    let input: BTreeMap<String, String> =
        [("goal".to_string(), "ship it".to_string())].into();
    let vars = run_vars(&RunId::new("run-1"), "demo", &input);

    assert_eq!(vars["run_id"], "run-1");
    assert_eq!(vars["pipeline"], "demo");
    assert_eq!(vars["input.goal"], "ship it");
}

#[test]
fn step_vars_add_identity() {
    let base = run_vars(&RunId::new("run-1"), "demo", &BTreeMap::new());
    let vars = step_vars(&base, &StepId::new("analyze"), None);
    assert_eq!(vars["step_id"], "analyze");
    assert_eq!(vars["run_id"], "run-1");
}

#[test]
fn matrix_item_binds_task() {
    let base = run_vars(&RunId::new("run-1"), "demo", &BTreeMap::new());
    let item = MatrixItem {
        index: 1,
        value: json!({"task": "fix bug", "priority": 2}),
    };
    let vars = step_vars(&base, &StepId::new("exec#1"), Some(&item));

    assert_eq!(vars["task.task"], "fix bug");
    assert_eq!(vars["task.priority"], "2");
    // The whole item is available as compact JSON
    assert!(vars["task"].contains("\"task\":\"fix bug\""));
}

#[test]
fn string_items_bind_verbatim() {
    let base = HashMap::new();
    let item = MatrixItem {
        index: 0,
        value: json!("plain task"),
    };
    let vars = step_vars(&base, &StepId::new("exec#0"), Some(&item));
    assert_eq!(vars["task"], "plain task");
}
