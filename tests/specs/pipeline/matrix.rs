//! S4: matrix fanout over an upstream task list.

use crate::prelude::*;
use wave_adapters::fake::{FakeRunner, ScriptedOutcome};
use wave_core::{RunStatus, StepState};
use wave_engine::RunOptions;

const FANOUT: &str = r#"
kind: WavePipeline
metadata: { name: fanout }
steps:
  - id: analyze
    persona: analyzer
    exec: { type: prompt, source: "plan the work" }
    output_artifacts:
      - { name: out, path: output/out.json, type: json }
  - id: exec
    persona: analyzer
    dependencies: [analyze]
    strategy:
      type: matrix
      items_source: { step: analyze, artifact: out, item_key: tasks }
      max_concurrency: 2
    exec: { type: prompt, source: "Do {{ task.task }}" }
"#;

const TASKS: &str = r#"{"tasks":[{"task":"a"},{"task":"b"},{"task":"c"}]}"#;

fn scripted_runner() -> FakeRunner {
    let runner = FakeRunner::new();
    runner.on_step(
        "analyze",
        ScriptedOutcome::success(50).with_file("output/out.json", TASKS),
    );
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        runner.on_step(
            &format!("exec#{i}"),
            ScriptedOutcome::success(50).with_file(&format!("output/{name}.txt"), name),
        );
    }
    runner
}

#[tokio::test]
async fn children_run_and_parent_merges() {
    let dir = tempfile::tempdir().unwrap();
    let runner = scripted_runner();
    let engine = engine_for(dir.path(), FANOUT, runner.clone());

    let report = engine
        .run(
            "fanout",
            input(&[]),
            RunOptions {
                run_id: Some("s4".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);

    let summary = &engine.status(Some("s4")).unwrap()[0];
    let child_states: Vec<(String, StepState)> = summary
        .steps
        .iter()
        .filter(|s| s.step_id.as_str().starts_with("exec#"))
        .map(|s| (s.step_id.to_string(), s.state))
        .collect();
    assert_eq!(child_states.len(), 3);
    assert!(child_states.iter().all(|(_, s)| *s == StepState::Completed));

    // Union merge landed in the parent workspace
    for name in ["a", "b", "c"] {
        let merged = dir
            .path()
            .join(".wave/workspaces/s4/exec/output")
            .join(format!("{name}.txt"));
        assert!(merged.exists(), "missing merged output {name}");
    }

    // Each child saw its own bound item
    assert_eq!(runner.calls_for("exec#2")[0].args[1], "Do c");
}

#[tokio::test]
async fn failing_child_fails_the_parent_but_not_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let runner = scripted_runner();
    runner.on_step("exec#1", ScriptedOutcome::exit_error(1));
    let engine = engine_for(dir.path(), FANOUT, runner);

    let report = engine
        .run(
            "fanout",
            input(&[]),
            RunOptions {
                run_id: Some("s4f".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);

    let summary = &engine.status(Some("s4f")).unwrap()[0];
    let state_of = |id: &str| {
        summary
            .steps
            .iter()
            .find(|s| s.step_id == id)
            .map(|s| s.state)
            .unwrap()
    };
    assert_eq!(state_of("exec#0"), StepState::Completed);
    assert_eq!(state_of("exec#1"), StepState::Failed);
    assert_eq!(state_of("exec#2"), StepState::Completed);
    assert_eq!(state_of("exec"), StepState::Failed);
}
