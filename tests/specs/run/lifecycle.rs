//! S5/S6: cancellation and resume.

use crate::prelude::*;
use std::time::Duration;
use wave_adapters::fake::{FakeRunner, ScriptedOutcome};
use wave_core::{RunStatus, StepState};
use wave_engine::RunOptions;

const CHAIN: &str = r#"
kind: WavePipeline
metadata: { name: chain }
steps:
  - id: first
    persona: analyzer
    exec: { type: prompt, source: "one" }
  - id: second
    persona: analyzer
    dependencies: [first]
    exec: { type: prompt, source: "two" }
"#;

#[tokio::test]
async fn failed_runs_resume_from_the_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.on_step("first", ScriptedOutcome::success(10));
    runner.on_step("second", ScriptedOutcome::exit_error(1));
    let engine = engine_for(dir.path(), CHAIN, runner.clone());

    let report = engine
        .run(
            "chain",
            input(&[]),
            RunOptions {
                run_id: Some("s6".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code, wave_core::exit::PIPELINE_FAILED);

    // The failure exhausted its (empty) retry budget, so a plain resume
    // leaves it terminal rather than burning another invocation
    runner.on_step("second", ScriptedOutcome::success(20));
    let report = engine.resume("s6", None).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(runner.calls_for("second").len(), 1);

    // Resuming from the failed step re-runs it as attempt 2; completed
    // work upstream is skipped
    let report = engine.resume("s6", Some("second")).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.calls_for("first").len(), 1);

    let summary = &engine.status(Some("s6")).unwrap()[0];
    let second = summary
        .steps
        .iter()
        .find(|s| s.step_id == "second")
        .unwrap();
    assert_eq!(second.state, StepState::Completed);
    assert_eq!(second.attempt, 2);
}

#[tokio::test]
async fn force_cancel_marks_run_cancelled_and_resume_reruns() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.on_step(
        "first",
        ScriptedOutcome::success(10).with_delay(Duration::from_secs(30)),
    );
    let engine = std::sync::Arc::new(engine_for(dir.path(), CHAIN, runner.clone()));

    let run_task = {
        let engine = std::sync::Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .run(
                    "chain",
                    input(&[]),
                    RunOptions {
                        run_id: Some("s5".to_string()),
                        ..Default::default()
                    },
                )
                .await
        })
    };

    // Let the first step get going, then force-cancel
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.cancel("s5", true).unwrap();

    let report = run_task.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.exit_code, wave_core::exit::INTERRUPTED);

    let summary = &engine.status(Some("s5")).unwrap()[0];
    let first = summary.steps.iter().find(|s| s.step_id == "first").unwrap();
    assert_eq!(first.state, StepState::Cancelled);

    // Resume clears the stale flag and re-executes the cancelled step
    runner.on_step("first", ScriptedOutcome::success(10));
    runner.on_step("second", ScriptedOutcome::success(10));
    let report = engine.resume("s5", None).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let summary = &engine.status(Some("s5")).unwrap()[0];
    let first = summary.steps.iter().find(|s| s.step_id == "first").unwrap();
    assert_eq!(first.state, StepState::Completed);
    assert_eq!(first.attempt, 2);
    assert_eq!(runner.calls_for("first").len(), 2);
}

#[tokio::test]
async fn run_summaries_list_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let engine = engine_for(dir.path(), CHAIN, runner);

    for id in ["old", "new"] {
        engine
            .run(
                "chain",
                input(&[]),
                RunOptions {
                    run_id: Some(id.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let summaries = engine.status(None).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].run.id, "new");
    assert_eq!(summaries[1].run.id, "old");
}
