// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    yaml = { "m.yaml", Format::Yaml },
    yml = { "m.yml", Format::Yaml },
    json = { "m.json", Format::Json },
    bare = { "m", Format::Yaml },
)]
fn format_from_path(file: &str, expected: Format) {
    assert_eq!(Format::from_path(std::path::Path::new(file)), expected);
}

#[test]
fn parses_json_manifest() {
    let json = r#"{
        "apiVersion": "v1",
        "kind": "WaveManifest",
        "adapters": {"claude": {"binary": "claude"}},
        "personas": {}
    }"#;
    let manifest = parse_manifest(json, Format::Json).unwrap();
    assert_eq!(manifest.adapters["claude"].binary, "claude");
}

#[test]
fn yaml_syntax_error_is_reported() {
    let err = parse_manifest("kind: [unclosed", Format::Yaml).unwrap_err();
    assert!(matches!(err, ParseError::Yaml(_)));
}

#[test]
fn empty_step_id_is_rejected() {
    let yaml = r#"
kind: WavePipeline
metadata: { name: p }
steps:
  - id: ""
    persona: x
    exec: { type: prompt, source: hi }
"#;
    let err = parse_pipeline(yaml, Format::Yaml).unwrap_err();
    assert!(err.to_string().contains("step id is required"));
}

#[test]
fn non_fresh_memory_strategy_is_rejected() {
    let yaml = r#"
kind: WavePipeline
metadata: { name: p }
steps:
  - id: a
    persona: x
    memory: { strategy: persistent }
    exec: { type: prompt, source: hi }
"#;
    let err = parse_pipeline(yaml, Format::Yaml).unwrap_err();
    assert!(err.to_string().contains("only 'fresh' is supported"));
}

#[test]
fn unknown_strategy_type_is_rejected() {
    let yaml = r#"
kind: WavePipeline
metadata: { name: p }
steps:
  - id: a
    persona: x
    dependencies: []
    strategy:
      type: shard
      items_source: { step: a, artifact: out }
    exec: { type: prompt, source: hi }
"#;
    let err = parse_pipeline(yaml, Format::Yaml).unwrap_err();
    assert!(err.to_string().contains("only 'matrix' is supported"));
}

#[test]
fn pipeline_only_namespace_in_prompt_is_rejected() {
    let yaml = r#"
kind: WavePipeline
metadata: { name: p }
steps:
  - id: a
    persona: x
    exec: { type: prompt, source: "Use {{ var.goal }}" }
"#;
    let err = parse_pipeline(yaml, Format::Yaml).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("var.goal"));
    assert!(msg.contains("input.<name>"));
}

#[test]
fn branch_template_namespaces_are_checked() {
    let yaml = r#"
kind: WavePipeline
metadata: { name: p }
steps:
  - id: a
    persona: x
    workspace: { type: worktree, branch: "wave/{{ step.out }}" }
    exec: { type: prompt, source: hi }
"#;
    assert!(parse_pipeline(yaml, Format::Yaml).is_err());
}

#[test]
fn valid_namespaces_pass() {
    let yaml = r#"
kind: WavePipeline
metadata: { name: p }
steps:
  - id: a
    persona: x
    exec: { type: prompt, source: "Goal {{ input.goal }} task {{ task }} run {{ run_id }}" }
"#;
    assert!(parse_pipeline(yaml, Format::Yaml).is_ok());
}

#[test]
fn load_reports_missing_file_with_path() {
    let err = load_manifest(std::path::Path::new("/nonexistent/wave.yaml")).unwrap_err();
    match err {
        ParseError::Io { path, .. } => assert!(path.contains("/nonexistent/wave.yaml")),
        other => panic!("expected Io error, got {:?}", other),
    }
}

#[test]
fn load_round_trip_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.yaml");
    std::fs::write(
        &path,
        "apiVersion: v1\nkind: WaveManifest\nadapters:\n  claude: { binary: claude }\n",
    )
    .unwrap();
    let manifest = load_manifest(&path).unwrap();
    assert_eq!(manifest.kind, "WaveManifest");
}
