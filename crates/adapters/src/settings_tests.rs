// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use wave_manifest::{parse_manifest, Format};

const MANIFEST: &str = r#"
apiVersion: v1
kind: WaveManifest
adapters:
  claude:
    binary: claude
    default_permissions:
      allowed_tools: ["Read"]
      deny: ["WebFetch"]
personas:
  analyzer:
    adapter: claude
    system_prompt_file: personas/analyzer.md
    temperature: 0.3
    permissions:
      allowed_tools: ["Bash(git *)"]
    hooks:
      pre_tool_use: "wave-hook pre"
    sandbox:
      allowed_domains: ["docs.rs"]
"#;

fn fixtures() -> (wave_manifest::Manifest, tempfile::TempDir) {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    (manifest, tempfile::tempdir().unwrap())
}

#[test]
fn writes_settings_and_memory_file() {
    let (manifest, dir) = fixtures();
    let (persona, adapter) = manifest.resolve_persona("analyzer").unwrap();

    let settings_path =
        materialize_project_files(dir.path(), persona, adapter, "# You are the analyzer").unwrap();

    assert_eq!(settings_path, dir.path().join(".claude/settings.json"));
    assert!(dir.path().join("CLAUDE.md").exists());
}

#[test]
fn settings_carry_merged_permissions_and_temperature() {
    let (manifest, dir) = fixtures();
    let (persona, adapter) = manifest.resolve_persona("analyzer").unwrap();
    let path = materialize_project_files(dir.path(), persona, adapter, "prompt").unwrap();

    let settings: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    let allow = settings["permissions"]["allow"].as_array().unwrap();
    assert!(allow.iter().any(|v| v == "Read"));
    assert!(allow.iter().any(|v| v == "Bash(git *)"));
    assert_eq!(settings["permissions"]["deny"][0], "WebFetch");
    assert_eq!(settings["temperature"], 0.3);
    assert_eq!(settings["sandbox"]["allowedDomains"][0], "docs.rs");
}

#[test]
fn hooks_render_with_matcher_structure() {
    let (manifest, dir) = fixtures();
    let (persona, adapter) = manifest.resolve_persona("analyzer").unwrap();
    let path = materialize_project_files(dir.path(), persona, adapter, "prompt").unwrap();

    let settings: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    let hook = &settings["hooks"]["PreToolUse"][0];
    assert_eq!(hook["matcher"], "");
    assert_eq!(hook["hooks"][0]["command"], "wave-hook pre");
    assert!(settings["hooks"].get("PostToolUse").is_none());
}

#[test]
fn memory_file_lists_restrictions() {
    let (manifest, dir) = fixtures();
    let (persona, adapter) = manifest.resolve_persona("analyzer").unwrap();
    materialize_project_files(dir.path(), persona, adapter, "# Analyzer prompt").unwrap();

    let memory = fs::read_to_string(dir.path().join("CLAUDE.md")).unwrap();
    assert!(memory.starts_with("# Analyzer prompt"));
    assert!(memory.contains("## Restrictions"));
    assert!(memory.contains("Denied tools: WebFetch"));
    assert!(memory.contains("Bash(git *)"));
    assert!(memory.contains("docs.rs"));
}

#[test]
fn persona_without_extras_renders_minimal_settings() {
    let yaml = r#"
apiVersion: v1
kind: WaveManifest
adapters:
  claude: { binary: claude }
personas:
  bare:
    adapter: claude
    system_prompt_file: p.md
"#;
    let manifest = parse_manifest(yaml, Format::Yaml).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (persona, adapter) = manifest.resolve_persona("bare").unwrap();
    let path = materialize_project_files(dir.path(), persona, adapter, "prompt").unwrap();

    let settings: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert!(settings.get("temperature").is_none());
    assert!(settings.get("sandbox").is_none());
    assert!(settings.get("hooks").is_none());

    let memory = fs::read_to_string(dir.path().join("CLAUDE.md")).unwrap();
    assert!(memory.contains("Allowed tools: none"));
}
