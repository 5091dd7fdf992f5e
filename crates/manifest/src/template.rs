// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template variable interpolation.
//!
//! Prompt sources, branch names, and command templates reference run
//! variables with `{{ name }}` or `{{ namespace.name }}` placeholders.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex pattern for `{{ variable }}` or `{{ namespace.variable }}`
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
pub static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_-]*)*)\s*\}\}")
        .expect("constant regex pattern is valid")
});

/// Escape a string for safe use inside shell double-quoted contexts.
///
/// Characters that have special meaning in double-quoted shell strings
/// are backslash-escaped so they're treated literally:
/// - Backslash `\` → `\\`
/// - Dollar sign `$` → `\$`
/// - Backtick `` ` `` → `` \` ``
/// - Double quote `"` → `\"`
pub fn escape_for_shell(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '$' => result.push_str("\\$"),
            '`' => result.push_str("\\`"),
            '"' => result.push_str("\\\""),
            _ => result.push(c),
        }
    }
    result
}

/// Interpolate `{{ name }}` placeholders with values from the vars map.
///
/// Unknown template variables are left as-is.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> String {
    interpolate_inner(template, vars, false)
}

/// Interpolate with shell-safe escaping of substituted values.
///
/// Use this for command contexts; use [`interpolate`] for prompts and
/// other non-shell contexts.
pub fn interpolate_shell(template: &str, vars: &HashMap<String, String>) -> String {
    interpolate_inner(template, vars, true)
}

fn interpolate_inner(
    template: &str,
    vars: &HashMap<String, String>,
    shell_escape: bool,
) -> String {
    VAR_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match vars.get(name) {
                Some(val) if shell_escape => escape_for_shell(val),
                Some(val) => val.clone(),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

/// List the variable names a template references.
pub fn template_refs(template: &str) -> Vec<String> {
    VAR_PATTERN
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
