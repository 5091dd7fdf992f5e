// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn interpolates_simple_vars() {
    let vars = vars(&[("task", "fix the bug"), ("run_id", "run-1")]);
    assert_eq!(
        interpolate("Do {{ task }} in {{ run_id }}", &vars),
        "Do fix the bug in run-1"
    );
}

#[test]
fn interpolates_namespaced_vars() {
    let vars = vars(&[("input.goal", "hello")]);
    assert_eq!(interpolate("Goal: {{ input.goal }}", &vars), "Goal: hello");
}

#[test]
fn whitespace_inside_braces_is_optional() {
    let vars = vars(&[("task", "x")]);
    assert_eq!(interpolate("{{task}} {{ task }}", &vars), "x x");
}

#[test]
fn unknown_vars_are_left_as_is() {
    let vars = vars(&[]);
    assert_eq!(interpolate("keep {{ missing }}", &vars), "keep {{ missing }}");
}

#[test]
fn shell_interpolation_escapes_values() {
    let vars = vars(&[("input.title", r#"a "quoted" $var `cmd`"#)]);
    assert_eq!(
        interpolate_shell("echo \"{{ input.title }}\"", &vars),
        "echo \"a \\\"quoted\\\" \\$var \\`cmd\\`\""
    );
}

#[test]
fn plain_interpolation_does_not_escape() {
    let vars = vars(&[("task", "$HOME")]);
    assert_eq!(interpolate("{{ task }}", &vars), "$HOME");
}

#[test]
fn escape_for_shell_handles_backslash() {
    assert_eq!(escape_for_shell(r"a\b"), r"a\\b");
}

#[test]
fn template_refs_lists_names() {
    assert_eq!(
        template_refs("{{ input.goal }} and {{ task }} and {{ task }}"),
        vec!["input.goal", "task", "task"]
    );
    assert!(template_refs("no refs here").is_empty());
}
