//! S1: a two-step chain with artifact handover.

use crate::prelude::*;
use wave_adapters::fake::{FakeRunner, ScriptedOutcome};
use wave_core::RunStatus;
use wave_engine::RunOptions;

const CHAIN: &str = r#"
kind: WavePipeline
metadata: { name: chain }
input:
  required: [goal]
steps:
  - id: analyze
    persona: analyzer
    exec: { type: prompt, source: "Analyze {{ input.goal }}" }
    output_artifacts:
      - { name: out, path: output/out.json, type: json }
  - id: execute
    persona: analyzer
    dependencies: [analyze]
    memory:
      inject_artifacts:
        - { step: analyze, artifact: out, as: plan }
    exec: { type: prompt, source: "Execute the plan" }
"#;

#[tokio::test]
async fn both_steps_complete_and_tokens_sum() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.on_step(
        "analyze",
        ScriptedOutcome::success(100).with_file("output/out.json", r#"{"ok":true}"#),
    );
    runner.on_step("execute", ScriptedOutcome::success(100));
    let engine = engine_for(dir.path(), CHAIN, runner);

    let report = engine
        .run(
            "chain",
            input(&[("goal", "hello")]),
            RunOptions {
                run_id: Some("s1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.exit_code, 0);

    let summary = &engine.status(Some("s1")).unwrap()[0];
    assert_eq!(summary.run.total_tokens, 200);
    assert!(summary
        .steps
        .iter()
        .all(|s| s.state == wave_core::StepState::Completed));

    // The declared artifact exists at its workspace-relative path
    let out = dir
        .path()
        .join(".wave/workspaces/s1/analyze/output/out.json");
    assert!(out.exists());
    assert_eq!(engine.artifacts("s1", Some("analyze")).unwrap().len(), 1);
}

#[tokio::test]
async fn events_stream_the_lifecycle_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.on_step(
        "analyze",
        ScriptedOutcome::success(10).with_file("output/out.json", "{}"),
    );
    runner.on_step("execute", ScriptedOutcome::success(10));
    let engine = engine_for(dir.path(), CHAIN, runner);

    engine
        .run(
            "chain",
            input(&[("goal", "x")]),
            RunOptions {
                run_id: Some("s1e".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (events, _live) = engine.logs("s1e", &wave_engine::LogFilter::default()).unwrap();
    let states: Vec<wave_core::StreamState> = events.iter().map(|e| e.state).collect();

    use wave_core::StreamState::*;
    assert_eq!(states.first(), Some(&RunStarted));
    assert_eq!(states.last(), Some(&RunCompleted));
    // Strictly increasing IDs within the run
    assert!(events.windows(2).all(|w| w[0].id < w[1].id));
}
