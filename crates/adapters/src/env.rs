// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Curated subprocess environment.
//!
//! Adapter subprocesses never inherit the host environment. Only a fixed
//! base set, telemetry suppression, names listed in
//! `runtime.sandbox.env_passthrough`, and step-declared variables flow
//! through. Values are read here at spawn time and handed straight to the
//! child; they are never persisted or logged.

use std::collections::BTreeMap;

/// Host variables always relayed when present.
const BASE_PASSTHROUGH: &[&str] = &["HOME", "PATH", "TERM", "TMPDIR"];

/// Telemetry suppression, set unconditionally.
const TELEMETRY_SUPPRESSION: &[(&str, &str)] = &[
    ("DISABLE_TELEMETRY", "1"),
    ("DO_NOT_TRACK", "1"),
    ("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", "1"),
];

/// Build the curated environment for an adapter subprocess.
///
/// Precedence (later wins): base passthrough, telemetry suppression,
/// manifest passthrough names, step-declared variables.
pub fn curated_env(
    passthrough: &[String],
    step_env: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    let mut push = |name: &str, value: String| {
        env.retain(|(k, _)| k != name);
        env.push((name.to_string(), value));
    };

    for name in BASE_PASSTHROUGH {
        if let Ok(value) = std::env::var(name) {
            push(name, value);
        }
    }

    for (name, value) in TELEMETRY_SUPPRESSION {
        push(name, value.to_string());
    }

    // Never fabricate a value; forward only when the host actually has it.
    for name in passthrough {
        if let Ok(value) = std::env::var(name) {
            push(name, value);
        }
    }

    for (name, value) in step_env {
        push(name, value.clone());
    }

    env
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
