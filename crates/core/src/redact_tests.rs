// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    key_suffix = { "ANTHROPIC_API_KEY", true },
    token_suffix = { "GH_TOKEN", true },
    secret_suffix = { "AWS_SECRET", true },
    password_suffix = { "DB_PASSWORD", true },
    credential_infix = { "MY_CREDENTIALS_FILE", true },
    lowercase = { "anthropic_api_key", true },
    plain = { "PATH", false },
    keyboard = { "KEYBOARD", false },
    token_prefix_only = { "TOKEN_COUNT", false },
)]
fn credential_name_detection(name: &str, expected: bool) {
    assert_eq!(is_credential_name(name), expected);
}

#[test]
fn scrubs_assignment_value() {
    let msg = "spawn failed: env MY_API_KEY=sk-abc123 rejected";
    assert_eq!(
        scrub(msg),
        "spawn failed: env MY_API_KEY=[REDACTED] rejected"
    );
}

#[test]
fn scrubs_json_style_pairs() {
    let msg = r#"settings: {"GH_TOKEN": "ghp_secretvalue"}"#;
    assert_eq!(scrub(msg), r#"settings: {"GH_TOKEN": [REDACTED]}"#);
}

#[test]
fn scrubs_colon_separated() {
    let msg = "DB_PASSWORD: hunter2 was logged";
    assert_eq!(scrub(msg), "DB_PASSWORD: [REDACTED] was logged");
}

#[test]
fn scrub_is_case_insensitive() {
    let msg = "aws_secret=abc";
    assert_eq!(scrub(msg), "aws_secret=[REDACTED]");
}

#[test]
fn leaves_innocent_text_alone() {
    let msg = "step analyze completed with 100 tokens";
    assert_eq!(scrub(msg), msg);
}

#[test]
fn scrubs_multiple_occurrences() {
    let msg = "A_KEY=1 B_TOKEN=2";
    assert_eq!(scrub(msg), "A_KEY=[REDACTED] B_TOKEN=[REDACTED]");
}
