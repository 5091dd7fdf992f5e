// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

struct RenameField;

impl Migration for RenameField {
    fn source_version(&self) -> u32 {
        1
    }
    fn target_version(&self) -> u32 {
        2
    }
    fn checksum(&self) -> &'static str {
        "m2-rename-field"
    }
    fn migrate(&self, snapshot: &mut Value) -> Result<(), MigrationError> {
        let obj = snapshot
            .as_object_mut()
            .ok_or_else(|| MigrationError::Failed {
                from: 1,
                to: 2,
                reason: "snapshot is not an object".to_string(),
            })?;
        if let Some(value) = obj.remove("old") {
            obj.insert("new".to_string(), value);
        }
        Ok(())
    }
}

#[test]
fn same_version_is_identity() {
    let registry = MigrationRegistry::new();
    let (out, applied) = registry.migrate_to(json!({"v": 1, "old": true}), 1).unwrap();
    assert_eq!(out, json!({"v": 1, "old": true}));
    assert!(applied.is_empty());
}

#[test]
fn missing_version_defaults_to_one() {
    let registry = MigrationRegistry::new();
    let (_, applied) = registry.migrate_to(json!({}), 1).unwrap();
    assert!(applied.is_empty());
}

#[test]
fn chain_applies_and_records() {
    let mut registry = MigrationRegistry::new();
    registry.register(Box::new(RenameField));

    let (out, applied) = registry.migrate_to(json!({"v": 1, "old": 7}), 2).unwrap();
    assert_eq!(out, json!({"v": 2, "new": 7}));
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].version, 2);
    assert_eq!(applied[0].checksum, "m2-rename-field");
}

#[test]
fn newer_snapshot_is_rejected() {
    let registry = MigrationRegistry::new();
    let err = registry.migrate_to(json!({"v": 9}), 1).unwrap_err();
    assert!(matches!(err, MigrationError::TooNew(9, 1)));
}

#[test]
fn missing_path_is_an_error() {
    let registry = MigrationRegistry::new();
    let err = registry.migrate_to(json!({"v": 1}), 2).unwrap_err();
    assert!(matches!(err, MigrationError::NoPath(1, 2)));
}
