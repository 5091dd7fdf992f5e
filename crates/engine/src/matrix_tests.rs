// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[test]
fn load_items_extracts_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    write(
        &path,
        r#"{"tasks":[{"task":"a"},{"task":"b"},{"task":"c"}]}"#,
    );

    let items = load_items(&path, "tasks").unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].index, 0);
    assert_eq!(items[2].value, json!({"task": "c"}));
}

#[test]
fn load_items_missing_key_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    write(&path, r#"{"other":[]}"#);

    let err = load_items(&path, "tasks").unwrap_err();
    assert!(matches!(err, MatrixError::MissingKey { .. }));
}

#[test]
fn load_items_bad_json_is_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    write(&path, "not json");

    assert!(matches!(
        load_items(&path, "tasks").unwrap_err(),
        MatrixError::Source { .. }
    ));
}

#[test]
fn load_items_missing_file_is_source_error() {
    let err = load_items(Path::new("/nope/out.json"), "tasks").unwrap_err();
    assert!(matches!(err, MatrixError::Source { .. }));
}

#[test]
fn merge_unions_disjoint_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("child-a");
    let b = dir.path().join("child-b");
    write(&a.join("one.txt"), "1");
    write(&b.join("sub/two.txt"), "2");

    let dest = dir.path().join("merged");
    let merged = merge_outputs(
        &[
            (StepId::new("exec#0"), a),
            (StepId::new("exec#1"), b),
        ],
        &dest,
    )
    .unwrap();

    assert_eq!(merged.len(), 2);
    assert_eq!(std::fs::read_to_string(dest.join("one.txt")).unwrap(), "1");
    assert_eq!(
        std::fs::read_to_string(dest.join("sub/two.txt")).unwrap(),
        "2"
    );
}

#[test]
fn identical_bytes_are_not_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("child-a");
    let b = dir.path().join("child-b");
    write(&a.join("shared.txt"), "same");
    write(&b.join("shared.txt"), "same");

    let dest = dir.path().join("merged");
    let merged = merge_outputs(
        &[
            (StepId::new("exec#0"), a),
            (StepId::new("exec#1"), b),
        ],
        &dest,
    )
    .unwrap();
    assert_eq!(merged.len(), 1);
}

#[test]
fn diverging_bytes_conflict_with_file_list() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("child-a");
    let b = dir.path().join("child-b");
    write(&a.join("shared.txt"), "from a");
    write(&b.join("shared.txt"), "from b");

    let dest = dir.path().join("merged");
    let err = merge_outputs(
        &[
            (StepId::new("exec#0"), a),
            (StepId::new("exec#1"), b),
        ],
        &dest,
    )
    .unwrap_err();

    match err {
        MatrixError::Conflict { files } => {
            assert_eq!(files.len(), 1);
            assert!(files[0].contains("shared.txt"));
            assert!(files[0].contains("exec#0"));
            assert!(files[0].contains("exec#1"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn missing_child_output_dir_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("child-a");
    write(&a.join("one.txt"), "1");

    let dest = dir.path().join("merged");
    let merged = merge_outputs(
        &[
            (StepId::new("exec#0"), a),
            (StepId::new("exec#1"), dir.path().join("never-created")),
        ],
        &dest,
    )
    .unwrap();
    assert_eq!(merged.len(), 1);
}

#[test]
fn children_error_message_aggregates() {
    let err = MatrixError::Children {
        children: vec![
            (StepId::new("exec#1"), "exit 1".to_string()),
            (StepId::new("exec#2"), "missing artifact".to_string()),
        ],
    };
    let message = err.to_string();
    assert!(message.contains("2 matrix child(ren) failed"));
    assert!(message.contains("exec#1: exit 1"));
    assert!(message.contains("exec#2: missing artifact"));
}
