// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use std::time::Duration;
use wave_manifest::ContractPolicy;

fn timeout() -> Duration {
    Duration::from_secs(30)
}

fn env() -> Vec<(String, String)> {
    vec![("PATH".to_string(), "/usr/bin:/bin".to_string())]
}

fn write(workspace: &Path, rel: &str, content: &str) {
    let path = workspace.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn json_schema_contract(schema: serde_json::Value) -> Contract {
    Contract::JsonSchema {
        source: "output/out.json".to_string(),
        schema: Some(schema),
        schema_path: None,
        policy: ContractPolicy::default(),
    }
}

#[tokio::test]
async fn json_schema_passes_on_valid_output() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "output/out.json", r#"{"files": []}"#);

    let contract = json_schema_contract(json!({
        "type": "object",
        "required": ["files"],
        "properties": {"files": {"type": "array"}}
    }));
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(report.passed);
}

#[tokio::test]
async fn json_schema_fails_on_violation() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "output/out.json", r#"{}"#);

    let contract = json_schema_contract(json!({
        "type": "object",
        "required": ["files"]
    }));
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(!report.passed);
    assert!(report.reason.unwrap().contains("files"));
}

#[tokio::test]
async fn json_schema_fails_on_missing_or_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let contract = json_schema_contract(json!({"type": "object"}));

    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(!report.passed);
    assert!(report.reason.unwrap().contains("missing output file"));

    write(dir.path(), "output/out.json", "not json");
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(!report.passed);
    assert!(report.reason.unwrap().contains("invalid JSON"));
}

#[tokio::test]
async fn json_schema_loads_schema_from_project_file() {
    let workspace = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    write(workspace.path(), "output/out.json", r#"{"files": []}"#);
    write(
        project.path(),
        "schemas/out.json",
        r#"{"type": "object", "required": ["files"]}"#,
    );

    let contract = Contract::JsonSchema {
        source: "output/out.json".to_string(),
        schema: None,
        schema_path: Some("schemas/out.json".into()),
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, workspace.path(), project.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(report.passed);
}

#[tokio::test]
async fn json_schema_without_any_schema_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "output/out.json", "{}");
    let contract = Contract::JsonSchema {
        source: "output/out.json".to_string(),
        schema: None,
        schema_path: None,
        policy: ContractPolicy::default(),
    };
    let err = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap_err();
    assert!(matches!(err, ContractError::MissingSchema));
}

#[tokio::test]
async fn test_suite_passes_on_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let contract = Contract::TestSuite {
        command: "test -d output || mkdir output; true".to_string(),
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(report.passed);
}

#[tokio::test]
async fn test_suite_fails_on_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let contract = Contract::TestSuite {
        command: "echo broken >&2; exit 2".to_string(),
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(!report.passed);
    let reason = report.reason.unwrap();
    assert!(reason.contains("exited 2"));
    assert!(reason.contains("broken"));
}

#[tokio::test]
async fn test_suite_times_out_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let contract = Contract::TestSuite {
        command: "sleep 30".to_string(),
        policy: ContractPolicy::default(),
    };
    let report = check_contract(
        &contract,
        dir.path(),
        dir.path(),
        &env(),
        Duration::from_millis(100),
    )
    .await
    .unwrap();
    assert!(!report.passed);
    assert!(report.reason.unwrap().contains("timed out"));
}

#[tokio::test]
async fn markdownspec_checks_sections() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "output/spec.md",
        "# Title\n\n## Summary\n\ntext\n\n## Decisions\n\nmore\n",
    );

    let contract = Contract::Markdownspec {
        source: "output/spec.md".to_string(),
        sections: vec!["Summary".to_string(), "Decisions".to_string()],
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(report.passed);

    let contract = Contract::Markdownspec {
        source: "output/spec.md".to_string(),
        sections: vec!["Summary".to_string(), "Risks".to_string()],
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(!report.passed);
    assert!(report.reason.unwrap().contains("Risks"));
}

#[tokio::test]
async fn typescript_degrades_without_tsc() {
    // These environments don't ship tsc; exercise the degraded path
    if which("tsc").is_some() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "output/api.ts",
        "interface Payload { files: string[] }\nconst x: Payload = { files: [] };\n",
    );

    let contract = Contract::TypescriptInterface {
        source: "output/api.ts".to_string(),
        interface: "Payload".to_string(),
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(report.passed);
    assert!(!report.warnings.is_empty());

    write(dir.path(), "output/broken.ts", "interface Payload { files: \n");
    let contract = Contract::TypescriptInterface {
        source: "output/broken.ts".to_string(),
        interface: "Payload".to_string(),
        policy: ContractPolicy::default(),
    };
    let report = check_contract(&contract, dir.path(), dir.path(), &env(), timeout())
        .await
        .unwrap();
    assert!(!report.passed);
}

#[test]
fn balance_checker_handles_strings_and_comments() {
    assert!(balanced("function f() { return [1, 2]; }"));
    assert!(balanced("const s = \"unmatched { inside string\";"));
    assert!(balanced("// comment with { unmatched\nconst x = 1;"));
    assert!(!balanced("function f() { return [1, 2];"));
    assert!(!balanced("}{"));
}
