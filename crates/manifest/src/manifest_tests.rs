// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::parser::{parse_manifest, Format};

const MANIFEST: &str = r#"
apiVersion: v1
kind: WaveManifest
metadata:
  name: demo
adapters:
  claude:
    binary: claude
    default_permissions:
      allowed_tools: ["Read", "Edit"]
      deny: ["WebFetch"]
personas:
  analyzer:
    adapter: claude
    system_prompt_file: .wave/personas/analyzer.md
    temperature: 0.2
    permissions:
      allowed_tools: ["Bash(git *)"]
runtime:
  max_concurrent_workers: 3
"#;

#[test]
fn parses_and_injects_names() {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    assert_eq!(manifest.adapters["claude"].name, "claude");
    assert_eq!(manifest.personas["analyzer"].name, "analyzer");
}

#[test]
fn adapter_defaults() {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    let adapter = &manifest.adapters["claude"];
    assert_eq!(adapter.mode, "headless");
    assert_eq!(adapter.output_format, "stream-json");
    assert_eq!(adapter.success_exit_codes, vec![0]);
}

#[test]
fn runtime_defaults() {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    let runtime = &manifest.runtime;
    assert_eq!(runtime.max_concurrent_workers, 3);
    assert_eq!(runtime.default_timeout_minutes, 30.0);
    assert_eq!(runtime.relay.token_threshold_percent, 80);
    assert_eq!(runtime.relay.min_tokens, 1000);
    assert_eq!(runtime.relay.context_window, 200_000);
    assert_eq!(runtime.relay.summarizer_persona, "summarizer");
    assert!(!runtime.trace);
    assert_eq!(runtime.meta_pipeline.max_steps, 50);
}

#[test]
fn resolve_persona_returns_adapter_pair() {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    let (persona, adapter) = manifest.resolve_persona("analyzer").unwrap();
    assert_eq!(persona.temperature, Some(0.2));
    assert_eq!(adapter.binary, "claude");
    assert!(manifest.resolve_persona("ghost").is_none());
}

#[test]
fn effective_permissions_are_deny_wins_merged() {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    let perms = manifest.effective_permissions("analyzer").unwrap();
    assert!(perms.evaluate("Read"));
    assert!(perms.evaluate("Bash(git status)"));
    assert!(!perms.evaluate("WebFetch"));
}

#[test]
fn manifest_round_trips_through_yaml() {
    let manifest = parse_manifest(MANIFEST, Format::Yaml).unwrap();
    let serialized = serde_yaml::to_string(&manifest).unwrap();
    let reparsed = parse_manifest(&serialized, Format::Yaml).unwrap();
    assert_eq!(reparsed, manifest);
}

#[test]
fn system_prompt_alias_is_accepted() {
    let yaml = r#"
apiVersion: v1
kind: WaveManifest
adapters:
  claude: { binary: claude }
personas:
  p:
    adapter: claude
    system_prompt: prompts/p.md
"#;
    let manifest = parse_manifest(yaml, Format::Yaml).unwrap();
    assert_eq!(
        manifest.personas["p"].system_prompt_file,
        std::path::PathBuf::from("prompts/p.md")
    );
}

#[test]
fn unknown_fields_are_rejected() {
    let yaml = r#"
apiVersion: v1
kind: WaveManifest
adapters:
  claude: { binary: claude, banana: true }
"#;
    assert!(parse_manifest(yaml, Format::Yaml).is_err());
}
