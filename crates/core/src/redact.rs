// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential scrubbing applied at the persistence boundary.
//!
//! Event-log messages and audit records never carry credential values: the
//! value portion of any `NAME=value` / `"NAME": "value"` pair whose name
//! matches a credential pattern is replaced with `[REDACTED]` before the
//! record reaches disk.

use regex::Regex;
use std::sync::LazyLock;

/// Name suffix/infix patterns that identify credential variables.
const CREDENTIAL_PATTERNS: &[&str] = &["_KEY", "_TOKEN", "_SECRET", "_PASSWORD", "_CREDENTIAL"];

// `NAME=value`, `NAME: value`, and `"NAME": "value"` forms. The value is a
// quoted string or a bare token up to whitespace.
#[allow(clippy::expect_used)]
static ASSIGNMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)("?)([A-Z0-9_]*(?:_KEY|_TOKEN|_SECRET|_PASSWORD|_CREDENTIAL[A-Z0-9_]*))("?\s*[=:]\s*)("[^"]*"|\S+)"#,
    )
    .expect("constant regex pattern is valid")
});

/// Check if an environment variable name matches a credential pattern.
///
/// `*_CREDENTIAL*` matches as an infix; the other patterns are suffixes.
pub fn is_credential_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    if upper.contains("_CREDENTIAL") {
        return true;
    }
    CREDENTIAL_PATTERNS
        .iter()
        .any(|p| *p != "_CREDENTIAL" && upper.ends_with(p))
}

/// Replace credential values in a message with `[REDACTED]`.
///
/// The variable name is kept so operators can still see *which* credential
/// leaked into a message; only the value is dropped.
pub fn scrub(message: &str) -> String {
    ASSIGNMENT_PATTERN
        .replace_all(message, |caps: &regex::Captures| {
            format!("{}{}{}[REDACTED]", &caps[1], &caps[2], &caps[3])
        })
        .to_string()
}

#[cfg(test)]
#[path = "redact_tests.rs"]
mod tests;
