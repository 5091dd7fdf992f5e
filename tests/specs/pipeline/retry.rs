//! S2: contract failure drives a retry in a fresh workspace.

use crate::prelude::*;
use wave_adapters::fake::{FakeRunner, ScriptedOutcome};
use wave_core::{RunStatus, StreamState};
use wave_engine::RunOptions;

const RETRY: &str = r#"
kind: WavePipeline
metadata: { name: retry }
steps:
  - id: emit
    persona: analyzer
    exec: { type: prompt, source: "emit files" }
    output_artifacts:
      - { name: out, path: output/out.json, type: json }
    handover:
      contract:
        type: json_schema
        source: output/out.json
        schema:
          type: object
          required: [files]
          properties: { files: { type: array } }
        on_failure: retry
        max_retries: 1
"#;

#[tokio::test]
async fn second_attempt_satisfies_the_contract() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.push(ScriptedOutcome::success(40).with_file("output/out.json", "{}"));
    runner.push(ScriptedOutcome::success(60).with_file("output/out.json", r#"{"files":[]}"#));
    let engine = engine_for(dir.path(), RETRY, runner.clone());

    let report = engine
        .run(
            "retry",
            input(&[]),
            RunOptions {
                run_id: Some("s2".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);

    let summary = &engine.status(Some("s2")).unwrap()[0];
    assert_eq!(summary.steps[0].attempt, 2);
    assert_eq!(summary.steps[0].tokens_used, 60);

    // Exactly one retrying event between the attempts
    let (events, _) = engine.logs("s2", &wave_engine::LogFilter::default()).unwrap();
    let retrying = events
        .iter()
        .filter(|e| e.state == StreamState::Retrying)
        .count();
    assert_eq!(retrying, 1);

    // Two invocations, two distinct workspaces
    let calls = runner.calls_for("emit");
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].workspace, calls[1].workspace);
}

#[tokio::test]
async fn max_retries_zero_means_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.push(ScriptedOutcome::success(10).with_file("output/out.json", "{}"));
    let pipeline = RETRY.replace("max_retries: 1", "max_retries: 0");
    let engine = engine_for(dir.path(), &pipeline, runner.clone());

    let report = engine
        .run(
            "retry",
            input(&[]),
            RunOptions {
                run_id: Some("s2z".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(runner.calls_for("emit").len(), 1);
}
