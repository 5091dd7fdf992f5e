// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{RunId, StepId};

fn sample() -> Artifact {
    Artifact {
        id: "art-1".to_string(),
        run_id: RunId::new("run-1"),
        step_id: StepId::new("analyze"),
        name: "out".to_string(),
        path: "output/out.json".to_string(),
        kind: "json".to_string(),
        size_bytes: 42,
        sha256: Some("abc123".to_string()),
        created_at_ms: 1_000_000,
    }
}

#[test]
fn key_is_step_and_name() {
    let art = sample();
    assert_eq!(art.key(), (StepId::new("analyze"), "out".to_string()));
}

#[test]
fn type_field_serializes_as_type() {
    let json = serde_json::to_value(sample()).unwrap();
    assert_eq!(json["type"], "json");
    assert!(json.get("kind").is_none());
}

#[test]
fn round_trips_through_json() {
    let art = sample();
    let json = serde_json::to_string(&art).unwrap();
    let parsed: Artifact = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, art);
}
