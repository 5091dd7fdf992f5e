// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DAG scheduler and step runtime.
//!
//! One executor drives one run. The loop computes the ready set (all
//! dependencies completed or skipped), dispatches up to
//! `max_concurrent_workers` step tasks, and re-evaluates on every
//! completion. Each task is linear: provision → inject → precheck → run →
//! relay → contract → collect, and returns a [`TaskResult`] the scheduler
//! persists; tasks never mutate run or step state themselves. Matrix
//! steps expand into child instances driven by a nested worker pool.

use crate::bus::EventBus;
use crate::contract::check_contract;
use crate::error::RuntimeError;
use crate::matrix::{load_items, merge_outputs, MatrixError, MatrixItem};
use crate::relay;
use crate::vars::{run_vars, step_vars};
use crate::workspace::{ResolvedInjection, WorkspaceManager};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use wave_adapters::{
    claude_argv, curated_env, materialize_project_files, AdapterRunner, FailureReason, Invocation,
};
use wave_core::{
    Artifact, Clock, Event, NoteSeverity, RunId, RunStatus, StepId, StepState, StreamEvent, exit,
};
use wave_manifest::{
    interpolate, interpolate_shell, Exec, FailurePolicy, Manifest, Pipeline, PreCheck, Step,
};
use wave_storage::StateStore;

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Stable CLI exit code for this outcome
    pub exit_code: i32,
}

/// Persists events and republishes their stream form.
#[derive(Clone)]
pub(crate) struct EventSink {
    store: Arc<Mutex<StateStore>>,
    bus: EventBus,
    trace: Option<PathBuf>,
}

impl EventSink {
    pub(crate) fn new(store: Arc<Mutex<StateStore>>, bus: EventBus, trace: Option<PathBuf>) -> Self {
        Self { store, bus, trace }
    }

    /// Persist (with one retry) and publish. The WAL append covers both the
    /// table update and the event entry.
    fn persist(&self, event: Event) -> Result<(), RuntimeError> {
        let (_seq, stream) = self.store.lock().append_with_retry(event)?;
        if let Some(stream) = stream {
            if let Some(trace) = &self.trace {
                append_trace(trace, &stream);
            }
            self.bus.publish(stream);
        }
        Ok(())
    }
}

fn append_trace(path: &Path, event: &StreamEvent) {
    let Ok(line) = serde_json::to_string(event) else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    use std::io::Write;
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{line}");
    }
}

/// Verdict of one step task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Completed,
    Failed { retryable: bool, timeout: bool },
    Cancelled,
}

/// Everything a step task reports back to the scheduler.
#[derive(Debug)]
struct TaskResult {
    step_id: StepId,
    verdict: Verdict,
    tokens: u64,
    duration_ms: u64,
    exit_code: Option<i32>,
    error: Option<String>,
    artifacts: Vec<Artifact>,
    notes: Vec<(NoteSeverity, String)>,
    /// Workspace this attempt actually used (None if provisioning failed)
    workspace: Option<PathBuf>,
}

impl TaskResult {
    fn failed(step_id: StepId, error: String, retryable: bool) -> Self {
        Self {
            step_id,
            verdict: Verdict::Failed {
                retryable,
                timeout: false,
            },
            tokens: 0,
            duration_ms: 0,
            exit_code: None,
            error: Some(error),
            artifacts: Vec::new(),
            notes: Vec::new(),
            workspace: None,
        }
    }
}

/// Shared per-run context handed to step tasks.
pub(crate) struct StepRuntime<R: AdapterRunner, C: Clock> {
    manifest: Arc<Manifest>,
    pipeline: Arc<Pipeline>,
    project_root: PathBuf,
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<R>,
    sink: EventSink,
    bus: EventBus,
    store: Arc<Mutex<StateStore>>,
    run_id: RunId,
    base_vars: HashMap<String, String>,
    force_cancel: CancellationToken,
    clock: C,
    workers: usize,
}

/// Drives one run to a terminal status.
pub struct RunExecutor<R: AdapterRunner + 'static, C: Clock + 'static> {
    rt: Arc<StepRuntime<R, C>>,
    pipeline: Arc<Pipeline>,
}

impl<R: AdapterRunner + 'static, C: Clock + 'static> RunExecutor<R, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest: Arc<Manifest>,
        pipeline: Arc<Pipeline>,
        project_root: PathBuf,
        store: Arc<Mutex<StateStore>>,
        bus: EventBus,
        runner: Arc<R>,
        clock: C,
        run_id: RunId,
    ) -> Self {
        let trace = manifest
            .runtime
            .trace
            .then(|| project_root.join(".wave/traces").join(format!("{run_id}.jsonl")));
        let workspaces = Arc::new(WorkspaceManager::new(
            project_root.clone(),
            manifest.runtime.workspace_root.clone(),
        ));
        let sink = EventSink::new(Arc::clone(&store), bus.clone(), trace);

        let input = store
            .lock()
            .state()
            .get_run(run_id.as_str())
            .map(|run| run.input.clone())
            .unwrap_or_default();
        let base_vars = run_vars(&run_id, pipeline.name(), &input);

        let workers = manifest.runtime.max_concurrent_workers.max(1) as usize;

        let rt = Arc::new(StepRuntime {
            manifest,
            pipeline: Arc::clone(&pipeline),
            project_root,
            workspaces,
            runner,
            sink,
            bus,
            store,
            run_id,
            base_vars,
            force_cancel: CancellationToken::new(),
            clock,
            workers,
        });

        Self { rt, pipeline }
    }

    /// Token that force-kills every adapter process group of this run.
    pub fn force_cancel_token(&self) -> CancellationToken {
        self.rt.force_cancel.clone()
    }

    /// Run the DAG to completion, honoring persisted state for resume.
    ///
    /// `from_step` additionally resets the named step and its transitive
    /// dependents so they re-execute even if previously completed.
    pub async fn execute(self, from_step: Option<&str>) -> Result<RunReport, RuntimeError> {
        let rt = &self.rt;
        let run_id = rt.run_id.clone();

        if let Some(from) = from_step {
            if self.pipeline.step(from).is_none() {
                return Err(RuntimeError::StepNotFound(from.to_string()));
            }
        }

        rt.sink.persist(Event::RunStarted {
            run_id: run_id.clone(),
            epoch_ms: rt.clock.epoch_ms(),
        })?;

        let reset = self.reset_set(from_step);
        let mut states = self.initial_states(&reset);
        let mut join_set: JoinSet<TaskResult> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut fail_fast = false;
        let mut saw_timeout = false;
        let mut cancelling = false;

        loop {
            // Cancellation is observed between dispatches (cooperative);
            // force also tears down running process groups.
            if let Some(record) = rt.store.lock().state().cancellation(run_id.as_str()) {
                cancelling = true;
                if record.force {
                    rt.force_cancel.cancel();
                }
            }

            if !cancelling && !fail_fast {
                while in_flight.len() < rt.workers {
                    let Some(step) = next_ready(&self.pipeline, &states, &in_flight) else {
                        break;
                    };
                    let step_id = StepId::new(step.id.clone());
                    let attempt = self.record_step_start(&step_id, None)?;
                    in_flight.insert(step.id.clone());

                    let rt = Arc::clone(&self.rt);
                    let step = step.clone();
                    if step.is_matrix() {
                        // A from_step reset re-runs even cached children
                        let fresh_children = reset.contains(&step.id);
                        join_set.spawn(async move {
                            run_matrix(rt, step, attempt, fresh_children).await
                        });
                    } else {
                        join_set.spawn(async move {
                            run_step(rt, step, None, None, attempt).await
                        });
                    }
                }
            }

            // Wake periodically so a cancellation flag set while every
            // worker is blocked still gets observed and propagated.
            let joined = loop {
                tokio::select! {
                    joined = join_set.join_next() => break joined,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if let Some(record) =
                            rt.store.lock().state().cancellation(run_id.as_str())
                        {
                            cancelling = true;
                            if record.force {
                                rt.force_cancel.cancel();
                            }
                        }
                    }
                }
            };
            let Some(joined) = joined else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(join_error) => {
                    // A panicking task is a failed step; we don't know which
                    // one, so fail the run rather than hang.
                    tracing::error!(error = %join_error, "step task aborted");
                    return Err(RuntimeError::Io(std::io::Error::other(
                        join_error.to_string(),
                    )));
                }
            };

            in_flight.remove(result.step_id.as_str());
            let step = self
                .pipeline
                .step(result.step_id.as_str())
                .cloned()
                .ok_or_else(|| RuntimeError::StepNotFound(result.step_id.to_string()))?;

            let new_state = self.record_step_result(&step, &result)?;
            if matches!(
                result.verdict,
                Verdict::Failed { timeout: true, .. }
            ) && new_state == StepState::Failed
            {
                saw_timeout = true;
            }
            if new_state == StepState::Failed && must_pass(&step) {
                fail_fast = true;
            }
            states.insert(result.step_id.to_string(), new_state);
        }

        // Steps never dispatched stay pending in the store; only the run
        // status records why the run stopped.
        let epoch_ms = rt.clock.epoch_ms();
        let any_failed = states
            .iter()
            .any(|(id, s)| *s == StepState::Failed && self.pipeline.step(id).is_some_and(must_pass));
        let all_done = states
            .values()
            .all(|s| matches!(s, StepState::Completed | StepState::Skipped));

        let (status, error, exit_code) = if cancelling && !all_done {
            (RunStatus::Cancelled, None, exit::INTERRUPTED)
        } else if any_failed {
            let message = first_failure_message(&self.pipeline, &states, &rt.store, &run_id);
            let code = if saw_timeout { exit::TIMEOUT } else { exit::PIPELINE_FAILED };
            (RunStatus::Failed, message, code)
        } else {
            (RunStatus::Completed, None, exit::SUCCESS)
        };

        rt.sink.persist(Event::RunFinished {
            run_id: run_id.clone(),
            status,
            error,
            epoch_ms,
        })?;
        rt.store.lock().flush()?;

        Ok(RunReport {
            run_id,
            status,
            exit_code,
        })
    }

    /// The steps a `from_step` override resets: the step itself plus its
    /// transitive dependents.
    fn reset_set(&self, from_step: Option<&str>) -> HashSet<String> {
        let mut reset: HashSet<String> = HashSet::new();
        if let Some(from) = from_step {
            reset.insert(from.to_string());
            for descendant in self.pipeline.descendants(from) {
                reset.insert(descendant);
            }
        }
        reset
    }

    /// Initial in-memory view of step states, applying resume semantics.
    ///
    /// Re-executed steps are exactly the pending/retrying ones plus whatever
    /// `from_step` resets. A persisted `Failed` means the retry budget was
    /// already exhausted (or the failure was not retryable), so it stays
    /// terminal unless explicitly targeted.
    fn initial_states(&self, reset: &HashSet<String>) -> HashMap<String, StepState> {
        let store = self.rt.store.lock();
        let state = store.state();

        self.pipeline
            .steps
            .iter()
            .map(|step| {
                let persisted = state
                    .step(self.rt.run_id.as_str(), &step.id)
                    .map(|exec| exec.state);
                let effective = match persisted {
                    // Completed and skipped work survives resume
                    Some(StepState::Completed) if !reset.contains(&step.id) => StepState::Completed,
                    Some(StepState::Skipped) if !reset.contains(&step.id) => StepState::Skipped,
                    // Exhausted failures don't get new attempts for free
                    Some(StepState::Failed) if !reset.contains(&step.id) => StepState::Failed,
                    // Everything else re-executes from a fresh attempt
                    _ => StepState::Pending,
                };
                (step.id.clone(), effective)
            })
            .collect()
    }

    /// Persist the Running transition; returns the attempt number now live.
    fn record_step_start(
        &self,
        step_id: &StepId,
        persona: Option<&str>,
    ) -> Result<u32, RuntimeError> {
        let attempt = {
            let store = self.rt.store.lock();
            store
                .state()
                .step(self.rt.run_id.as_str(), step_id.as_str())
                .map(|exec| exec.attempt + 1)
                .unwrap_or(1)
        };
        self.rt.sink.persist(Event::StepTransition {
            run_id: self.rt.run_id.clone(),
            step_id: step_id.clone(),
            state: StepState::Running,
            persona: persona.map(String::from),
            message: String::new(),
            tokens_used: 0,
            duration_ms: 0,
            exit_code: None,
            error: None,
            epoch_ms: self.rt.clock.epoch_ms(),
        })?;
        Ok(attempt)
    }

    /// Persist a task's outcome, deciding retry vs terminal state.
    fn record_step_result(
        &self,
        step: &Step,
        result: &TaskResult,
    ) -> Result<StepState, RuntimeError> {
        let rt = &self.rt;

        for (severity, message) in &result.notes {
            rt.sink.persist(Event::Note {
                run_id: rt.run_id.clone(),
                step_id: Some(result.step_id.clone()),
                severity: *severity,
                message: message.clone(),
                epoch_ms: rt.clock.epoch_ms(),
            })?;
        }

        let attempt = rt
            .store
            .lock()
            .state()
            .step(rt.run_id.as_str(), result.step_id.as_str())
            .map(|exec| exec.attempt)
            .unwrap_or(1);

        let state = match &result.verdict {
            Verdict::Completed => StepState::Completed,
            Verdict::Cancelled => StepState::Cancelled,
            Verdict::Failed { retryable, .. } => {
                let budget = attempt_budget(step);
                if *retryable && attempt < budget {
                    StepState::Retrying
                } else {
                    StepState::Failed
                }
            }
        };

        rt.sink.persist(Event::StepTransition {
            run_id: rt.run_id.clone(),
            step_id: result.step_id.clone(),
            state,
            persona: step.persona.clone(),
            message: String::new(),
            tokens_used: result.tokens,
            duration_ms: result.duration_ms,
            exit_code: result.exit_code,
            error: result.error.clone(),
            epoch_ms: rt.clock.epoch_ms(),
        })?;

        if state == StepState::Completed {
            for artifact in &result.artifacts {
                rt.sink.persist(Event::ArtifactRecorded {
                    artifact: artifact.clone(),
                })?;
            }
        }

        Ok(state)
    }
}

/// Maximum attempts for a step: `max_retries + 1` when its contract retries,
/// otherwise one.
fn attempt_budget(step: &Step) -> u32 {
    match &step.handover.contract {
        Some(contract) => {
            let policy = contract.policy();
            if policy.on_failure == FailurePolicy::Retry {
                policy.max_retries + 1
            } else {
                1
            }
        }
        None => 1,
    }
}

fn must_pass(step: &Step) -> bool {
    step.handover
        .contract
        .as_ref()
        .map(|c| c.policy().must_pass)
        .unwrap_or(true)
}

/// First declaration-ordered step whose ready conditions hold.
fn next_ready<'a>(
    pipeline: &'a Pipeline,
    states: &HashMap<String, StepState>,
    in_flight: &HashSet<String>,
) -> Option<&'a Step> {
    pipeline.steps.iter().find(|step| {
        if in_flight.contains(&step.id) {
            return false;
        }
        let state = states.get(&step.id).copied().unwrap_or(StepState::Pending);
        if !matches!(state, StepState::Pending | StepState::Retrying) {
            return false;
        }
        step.dependencies.iter().all(|dep| {
            states
                .get(dep)
                .copied()
                .is_some_and(|s| s.satisfies_dependency())
        })
    })
}

fn first_failure_message(
    pipeline: &Pipeline,
    states: &HashMap<String, StepState>,
    store: &Arc<Mutex<StateStore>>,
    run_id: &RunId,
) -> Option<String> {
    let store = store.lock();
    pipeline.steps.iter().find_map(|step| {
        if states.get(&step.id) != Some(&StepState::Failed) {
            return None;
        }
        let error = store
            .state()
            .step(run_id.as_str(), &step.id)
            .and_then(|exec| exec.error.clone())
            .unwrap_or_else(|| "step failed".to_string());
        Some(format!("step '{}' failed: {}", step.id, error))
    })
}

// === step task ===

/// One linear step attempt. Never touches run/step state; the scheduler
/// persists the returned result.
async fn run_step<R: AdapterRunner, C: Clock>(
    rt: Arc<StepRuntime<R, C>>,
    step: Step,
    instance_id: Option<StepId>,
    item: Option<MatrixItem>,
    attempt: u32,
) -> TaskResult {
    let step_id = instance_id.unwrap_or_else(|| StepId::new(step.id.clone()));
    let started = std::time::Instant::now();
    let mut notes: Vec<(NoteSeverity, String)> = Vec::new();

    let mut vars = step_vars(&rt.base_vars, &step_id, item.as_ref());

    // 1. Resolve injections from upstream artifacts
    let injections = match resolve_injections(&rt, &step) {
        Ok(injections) => injections,
        Err(message) => return TaskResult::failed(step_id, message, false),
    };

    // 2. Provision the workspace (fresh per attempt)
    let workspace = match rt
        .workspaces
        .provision(&rt.run_id, &step, &step_id, attempt, &vars, &injections)
        .await
    {
        Ok(handle) => handle,
        Err(e) => return TaskResult::failed(step_id, e.to_string(), false),
    };
    vars.insert(
        "workspace".to_string(),
        workspace.path.display().to_string(),
    );

    // 3. Curated environment
    let mut step_env = rt.manifest.runtime.sandbox.env.clone().into_iter().collect::<std::collections::BTreeMap<_, _>>();
    for (key, value) in &step.env {
        step_env.insert(key.clone(), interpolate(value, &vars));
    }
    let env = curated_env(&rt.manifest.runtime.sandbox.env_passthrough, &step_env);

    let timeout = step_timeout(&rt.manifest, &step);

    // 4. Pre-step validation: fail before any subprocess spawn
    for check in &step.validation {
        if let Some(message) = run_precheck(check, &workspace.path, &env, &vars).await {
            return TaskResult::failed(step_id, message, false);
        }
    }

    // 5. Execute
    let exec_result = match &step.exec {
        Exec::Command { command, args } => {
            let mut rendered = interpolate_shell(command, &vars);
            if let Some(args) = args {
                rendered.push(' ');
                rendered.push_str(&interpolate_shell(args, &vars));
            }
            run_shell(&rendered, &workspace.path, &env, timeout, &rt.force_cancel).await
        }
        Exec::Prompt { source } => {
            let prompt = interpolate(source, &vars);
            invoke_adapter(&rt, &step, &step_id, &workspace.path, &env, timeout, &prompt).await
        }
        Exec::SlashCommand { command, args } => {
            let rendered_args = args
                .as_ref()
                .map(|a| interpolate(a, &vars))
                .unwrap_or_default();
            let prompt = if rendered_args.is_empty() {
                format!("/{command}")
            } else {
                format!("/{command} {rendered_args}")
            };
            invoke_adapter(&rt, &step, &step_id, &workspace.path, &env, timeout, &prompt).await
        }
    };

    let exec = match exec_result {
        Ok(exec) => exec,
        Err(message) => return TaskResult::failed(step_id, message, false),
    };

    let tokens = exec.tokens_used;

    // 6. Relay compaction (never fatal)
    if let Some(compaction) = &step.handover.compaction {
        let relay_cfg = &rt.manifest.runtime.relay;
        let decision = relay::should_compact(
            tokens,
            relay_cfg.min_tokens,
            relay_cfg.context_window,
            compaction.trigger,
        );
        if decision.triggered {
            match relay::compact(
                rt.runner.as_ref(),
                &rt.manifest,
                &rt.project_root,
                &rt.run_id,
                &step_id,
                &workspace.path,
                env.clone(),
                timeout,
                heartbeat_channel(&rt),
                rt.force_cancel.child_token(),
            )
            .await
            {
                Ok(_) => {
                    notes.push((
                        NoteSeverity::Info,
                        format!(
                            "context compacted at {:.0}% utilization",
                            decision.utilization * 100.0
                        ),
                    ));
                }
                Err(e) => notes.push((
                    NoteSeverity::Warning,
                    format!("compaction failed, continuing uncompacted: {e}"),
                )),
            }
        }
    }

    // 7. Exec-level failure verdicts
    match exec.failure_reason {
        FailureReason::Ok => {}
        FailureReason::Cancelled => {
            return TaskResult {
                step_id,
                verdict: Verdict::Cancelled,
                tokens,
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: exec.exit_code,
                error: Some("cancelled".to_string()),
                artifacts: Vec::new(),
                notes,
                workspace: Some(workspace.path.clone()),
            };
        }
        reason => {
            let retryable = matches!(
                reason,
                FailureReason::Timeout | FailureReason::ExitNonzero | FailureReason::Signal
            );
            let error = exec
                .stdout_last_error
                .clone()
                .unwrap_or_else(|| format!("adapter failure: {reason}"));
            return TaskResult {
                step_id,
                verdict: Verdict::Failed {
                    retryable,
                    timeout: reason == FailureReason::Timeout,
                },
                tokens,
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: exec.exit_code,
                error: Some(error),
                artifacts: Vec::new(),
                notes,
                workspace: Some(workspace.path.clone()),
            };
        }
    }

    // 8. Declared outputs must exist
    let mut artifacts = Vec::new();
    for output in &step.output_artifacts {
        let path = workspace.path.join(&output.path);
        if !path.exists() {
            if output.required {
                return TaskResult {
                    step_id,
                    verdict: Verdict::Failed {
                        retryable: true,
                        timeout: false,
                    },
                    tokens,
                    duration_ms: started.elapsed().as_millis() as u64,
                    exit_code: exec.exit_code,
                    error: Some(format!("required artifact '{}' missing", output.name)),
                    artifacts: Vec::new(),
                    notes,
                    workspace: Some(workspace.path.clone()),
                };
            }
            continue;
        }
        artifacts.push(collect_artifact(
            &rt.run_id,
            &step_id,
            &output.name,
            &output.path,
            &output.kind,
            &path,
            rt.clock.epoch_ms(),
        ));
    }

    // Checkpoint produced by the relay becomes an addressable artifact
    let checkpoint = workspace.path.join(relay::CHECKPOINT_FILE);
    if checkpoint.exists() {
        artifacts.push(collect_artifact(
            &rt.run_id,
            &step_id,
            "checkpoint",
            relay::CHECKPOINT_FILE,
            "markdown",
            &checkpoint,
            rt.clock.epoch_ms(),
        ));
    }

    // 9. Handover contract
    if let Some(contract) = &step.handover.contract {
        match check_contract(contract, &workspace.path, &rt.project_root, &env, timeout).await {
            Ok(report) => {
                for warning in &report.warnings {
                    notes.push((NoteSeverity::Warning, warning.clone()));
                }
                if !report.passed {
                    let reason = report
                        .reason
                        .unwrap_or_else(|| "contract failed".to_string());
                    if contract.policy().must_pass {
                        return TaskResult {
                            step_id,
                            verdict: Verdict::Failed {
                                retryable: contract.policy().on_failure == FailurePolicy::Retry,
                                timeout: false,
                            },
                            tokens,
                            duration_ms: started.elapsed().as_millis() as u64,
                            exit_code: exec.exit_code,
                            error: Some(reason),
                            artifacts: Vec::new(),
                            notes,
                            workspace: Some(workspace.path.clone()),
                        };
                    }
                    // Recorded but non-fatal
                    notes.push((
                        NoteSeverity::Warning,
                        format!("contract failed (must_pass=false): {reason}"),
                    ));
                }
            }
            Err(e) => {
                return TaskResult {
                    step_id,
                    verdict: Verdict::Failed {
                        retryable: false,
                        timeout: false,
                    },
                    tokens,
                    duration_ms: started.elapsed().as_millis() as u64,
                    exit_code: exec.exit_code,
                    error: Some(e.to_string()),
                    artifacts: Vec::new(),
                    notes,
                    workspace: Some(workspace.path.clone()),
                };
            }
        }
    }

    TaskResult {
        step_id,
        verdict: Verdict::Completed,
        tokens,
        duration_ms: started.elapsed().as_millis() as u64,
        exit_code: exec.exit_code,
        error: None,
        artifacts,
        notes,
        workspace: Some(workspace.path.clone()),
    }
}

fn collect_artifact(
    run_id: &RunId,
    step_id: &StepId,
    name: &str,
    rel_path: &str,
    kind: &str,
    path: &Path,
    epoch_ms: u64,
) -> Artifact {
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let sha256 = std::fs::read(path).ok().map(|bytes| {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    });
    Artifact {
        id: format!("{}/{}/{}", run_id, step_id, name),
        run_id: run_id.clone(),
        step_id: step_id.clone(),
        name: name.to_string(),
        path: rel_path.to_string(),
        kind: kind.to_string(),
        size_bytes,
        sha256,
        created_at_ms: epoch_ms,
    }
}

/// Resolve declared injections to source files of completed upstream steps.
fn resolve_injections<R: AdapterRunner, C: Clock>(
    rt: &StepRuntime<R, C>,
    step: &Step,
) -> Result<Vec<ResolvedInjection>, String> {
    let store = rt.store.lock();
    let state = store.state();
    let mut resolved = Vec::new();

    for injection in &step.memory.inject_artifacts {
        let artifact = state
            .artifact(rt.run_id.as_str(), &injection.step, &injection.artifact)
            .ok_or_else(|| {
                format!(
                    "artifact '{}' from step '{}' not found",
                    injection.artifact, injection.step
                )
            })?;
        let source = producer_path(rt, state, &injection.step)?.join(&artifact.path);
        resolved.push(ResolvedInjection {
            source,
            as_name: injection.as_name.clone(),
        });
    }
    Ok(resolved)
}

/// Workspace directory of an upstream step's most recent attempt.
fn producer_path<R: AdapterRunner, C: Clock>(
    rt: &StepRuntime<R, C>,
    state: &wave_storage::MaterializedState,
    producer: &str,
) -> Result<PathBuf, String> {
    let step = rt
        .pipeline
        .step(producer)
        .ok_or_else(|| format!("unknown upstream step '{}'", producer))?;
    let step_id = StepId::new(producer);
    let attempt = state
        .step(rt.run_id.as_str(), producer)
        .map(|exec| exec.attempt)
        .unwrap_or(1);
    let vars = step_vars(&rt.base_vars, &step_id, None);
    Ok(rt
        .workspaces
        .resolve_dir(&rt.run_id, step, &step_id, attempt, &vars))
}

fn step_timeout(manifest: &Manifest, step: &Step) -> Duration {
    let minutes = step
        .timeout_minutes
        .unwrap_or(manifest.runtime.default_timeout_minutes);
    Duration::from_secs_f64((minutes * 60.0).max(0.1))
}

/// Forward runner heartbeats onto the bus.
fn heartbeat_channel<R: AdapterRunner, C: Clock>(
    rt: &Arc<StepRuntime<R, C>>,
) -> mpsc::Sender<StreamEvent> {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let bus = rt.bus.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            bus.publish(event);
        }
    });
    tx
}

struct ExecOutcome {
    exit_code: Option<i32>,
    tokens_used: u64,
    failure_reason: FailureReason,
    stdout_last_error: Option<String>,
}

/// Invoke the adapter for a prompt or slash-command exec.
async fn invoke_adapter<R: AdapterRunner, C: Clock>(
    rt: &Arc<StepRuntime<R, C>>,
    step: &Step,
    step_id: &StepId,
    workspace: &Path,
    env: &[(String, String)],
    timeout: Duration,
    prompt: &str,
) -> Result<ExecOutcome, String> {
    let persona_name = step
        .persona
        .as_deref()
        .ok_or_else(|| format!("step '{}' has no persona", step.id))?;
    let (persona, adapter) = rt
        .manifest
        .resolve_persona(persona_name)
        .ok_or_else(|| format!("unknown persona '{persona_name}'"))?;

    let prompt_path = rt.project_root.join(&persona.system_prompt_file);
    let system_prompt = std::fs::read_to_string(&prompt_path)
        .map_err(|e| format!("system prompt unreadable at {}: {e}", prompt_path.display()))?;

    let settings_path = materialize_project_files(workspace, persona, adapter, &system_prompt)
        .map_err(|e| format!("config materialization failed: {e}"))?;

    let permissions =
        wave_core::Permissions::merge(&adapter.default_permissions, &persona.permissions);
    let args = claude_argv(adapter, &permissions, &settings_path, prompt);

    let invocation = Invocation {
        run_id: rt.run_id.clone(),
        step_id: step_id.clone(),
        persona: Some(persona_name.to_string()),
        binary: adapter.binary.clone(),
        args,
        workspace: workspace.to_path_buf(),
        env: env.to_vec(),
        timeout,
        success_exit_codes: adapter.success_exit_codes.clone(),
    };

    let result = rt
        .runner
        .invoke(
            invocation,
            heartbeat_channel(rt),
            rt.force_cancel.child_token(),
        )
        .await
        .map_err(|e| e.to_string())?;

    Ok(ExecOutcome {
        exit_code: result.exit_code,
        tokens_used: result.tokens_used,
        failure_reason: result.failure_reason,
        stdout_last_error: result.stdout_last_error,
    })
}

/// Run a `command` exec or precheck command in the workspace.
async fn run_shell(
    command: &str,
    workspace: &Path,
    env: &[(String, String)],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExecOutcome, String> {
    let wrapped = format!("set -euo pipefail\n{command}");
    let mut cmd = tokio::process::Command::new("bash");
    cmd.arg("-c")
        .arg(&wrapped)
        .current_dir(workspace)
        .env_clear()
        .envs(env.iter().cloned())
        .kill_on_drop(true);

    let work = async {
        match cmd.output().await {
            Ok(output) => {
                let code = output.status.code();
                Ok(ExecOutcome {
                    exit_code: code,
                    tokens_used: 0,
                    failure_reason: match code {
                        Some(0) => FailureReason::Ok,
                        Some(_) => FailureReason::ExitNonzero,
                        None => FailureReason::Signal,
                    },
                    stdout_last_error: (!output.stderr.is_empty()).then(|| {
                        String::from_utf8_lossy(&output.stderr)
                            .trim()
                            .lines()
                            .last()
                            .unwrap_or("")
                            .to_string()
                    }),
                })
            }
            Err(e) => Err(format!("shell execution failed: {e}")),
        }
    };

    tokio::select! {
        result = work => result,
        _ = tokio::time::sleep(timeout) => Ok(ExecOutcome {
            exit_code: None,
            tokens_used: 0,
            failure_reason: FailureReason::Timeout,
            stdout_last_error: None,
        }),
        _ = cancel.cancelled() => Ok(ExecOutcome {
            exit_code: None,
            tokens_used: 0,
            failure_reason: FailureReason::Cancelled,
            stdout_last_error: None,
        }),
    }
}

/// Evaluate a precheck; `Some(message)` on failure.
async fn run_precheck(
    check: &PreCheck,
    workspace: &Path,
    env: &[(String, String)],
    vars: &HashMap<String, String>,
) -> Option<String> {
    match check {
        PreCheck::FileExists { path } => {
            let rendered = interpolate(path, vars);
            if workspace.join(&rendered).exists() {
                None
            } else {
                Some(format!("precheck failed: file '{rendered}' missing"))
            }
        }
        PreCheck::Command { command } => {
            let rendered = interpolate_shell(command, vars);
            match run_shell(
                &rendered,
                workspace,
                env,
                Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
            {
                Ok(outcome) if outcome.failure_reason == FailureReason::Ok => None,
                Ok(outcome) => Some(format!(
                    "precheck command exited {:?}: {}",
                    outcome.exit_code,
                    outcome.stdout_last_error.unwrap_or_default()
                )),
                Err(e) => Some(e),
            }
        }
    }
}

// === matrix ===

/// Run a matrix parent: expand, drive children under the matrix concurrency
/// bound, merge outputs, aggregate failures.
async fn run_matrix<R: AdapterRunner + 'static, C: Clock + 'static>(
    rt: Arc<StepRuntime<R, C>>,
    step: Step,
    parent_attempt: u32,
    fresh_children: bool,
) -> TaskResult {
    let parent_id = StepId::new(step.id.clone());
    let started = std::time::Instant::now();
    let Some(strategy) = step.strategy.clone() else {
        return TaskResult::failed(parent_id, "matrix step without strategy".to_string(), false);
    };

    // Locate the upstream artifact carrying the task list
    let items = {
        let source = {
            let store = rt.store.lock();
            let state = store.state();
            state
                .artifact(
                    rt.run_id.as_str(),
                    &strategy.items_source.step,
                    &strategy.items_source.artifact,
                )
                .map(|artifact| artifact.path.clone())
                .and_then(|rel| {
                    producer_path(&rt, state, &strategy.items_source.step)
                        .ok()
                        .map(|dir| dir.join(rel))
                })
        };
        let Some(path) = source else {
            return TaskResult::failed(
                parent_id,
                format!(
                    "items source artifact '{}' from step '{}' not found",
                    strategy.items_source.artifact, strategy.items_source.step
                ),
                false,
            );
        };
        match load_items(&path, &strategy.items_source.item_key) {
            Ok(items) => items,
            Err(e) => return TaskResult::failed(parent_id, e.to_string(), false),
        }
    };

    // Parent workspace receives the merged output tree
    let vars = step_vars(&rt.base_vars, &parent_id, None);
    let parent_workspace = match rt
        .workspaces
        .provision(&rt.run_id, &step, &parent_id, parent_attempt, &vars, &[])
        .await
    {
        Ok(handle) => handle,
        Err(e) => return TaskResult::failed(parent_id, e.to_string(), false),
    };

    let bound = (strategy.max_concurrency.max(1) as usize).min(rt.workers);
    let semaphore = Arc::new(Semaphore::new(bound));
    let mut join_set: JoinSet<(StepId, TaskResult, u32)> = JoinSet::new();

    for item in items {
        let child_id = parent_id.matrix_child(item.index);
        let rt = Arc::clone(&rt);
        let semaphore = Arc::clone(&semaphore);
        let mut child_step = step.clone();
        child_step.strategy = None; // children are plain steps

        join_set.spawn(async move {
            // Bound concurrency before any work, including workspace setup
            let _permit = semaphore.acquire_owned().await;
            drive_child(rt, child_step, child_id.clone(), item, fresh_children).await
        });
    }

    // Children persist their own token usage; the parent row records zero
    // so run totals count each token once.
    let mut tokens = 0u64;
    let mut failures: Vec<(StepId, String)> = Vec::new();
    let mut child_outputs: Vec<(StepId, PathBuf)> = Vec::new();
    let mut notes: Vec<(NoteSeverity, String)> = Vec::new();

    // No speculative abort: every child runs to its own terminal state
    while let Some(joined) = join_set.join_next().await {
        let Ok((child_id, result, attempt)) = joined else {
            failures.push((parent_id.clone(), "child task aborted".to_string()));
            continue;
        };
        tokens += result.tokens;
        notes.extend(result.notes.clone());
        match result.verdict {
            Verdict::Completed => {
                let output = result
                    .workspace
                    .clone()
                    .unwrap_or_else(|| rt.workspaces.step_dir(&rt.run_id, &child_id, attempt))
                    .join("output");
                child_outputs.push((child_id, output));
            }
            Verdict::Cancelled => {
                failures.push((child_id, "cancelled".to_string()));
            }
            Verdict::Failed { .. } => {
                failures.push((
                    child_id,
                    result.error.clone().unwrap_or_else(|| "failed".to_string()),
                ));
            }
        }
    }

    if !failures.is_empty() {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        let error = MatrixError::Children { children: failures }.to_string();
        return TaskResult {
            step_id: parent_id,
            verdict: Verdict::Failed {
                retryable: false,
                timeout: false,
            },
            tokens: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: None,
            error: Some(error),
            artifacts: Vec::new(),
            notes,
            workspace: Some(parent_workspace.path.clone()),
        };
    }

    tracing::debug!(parent = %parent_id, child_tokens = tokens, "matrix children finished");

    // Union merge; conflicting bytes fail the parent
    child_outputs.sort_by(|a, b| a.0.cmp(&b.0));
    let merge_dest = parent_workspace.path.join("output");
    if let Err(e) = merge_outputs(&child_outputs, &merge_dest) {
        return TaskResult {
            step_id: parent_id,
            verdict: Verdict::Failed {
                retryable: false,
                timeout: false,
            },
            tokens: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: None,
            error: Some(e.to_string()),
            artifacts: Vec::new(),
            notes,
            workspace: Some(parent_workspace.path.clone()),
        };
    }

    // Parent artifacts come from the merged tree
    let mut artifacts = Vec::new();
    for output in &step.output_artifacts {
        let path = parent_workspace.path.join(&output.path);
        if path.exists() {
            artifacts.push(collect_artifact(
                &rt.run_id,
                &parent_id,
                &output.name,
                &output.path,
                &output.kind,
                &path,
                rt.clock.epoch_ms(),
            ));
        } else if output.required {
            return TaskResult {
                step_id: parent_id,
                verdict: Verdict::Failed {
                    retryable: false,
                    timeout: false,
                },
                tokens: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: None,
                error: Some(format!(
                    "required artifact '{}' missing after merge",
                    output.name
                )),
                artifacts: Vec::new(),
                notes,
                workspace: Some(parent_workspace.path.clone()),
            };
        }
    }

    TaskResult {
        step_id: parent_id,
        verdict: Verdict::Completed,
        tokens: 0,
        duration_ms: started.elapsed().as_millis() as u64,
        exit_code: Some(0),
        error: None,
        artifacts,
        notes,
        workspace: Some(parent_workspace.path.clone()),
    }
}

/// Drive one matrix child through its attempts, persisting its transitions
/// on the scheduler's behalf.
///
/// Resume semantics match ordinary steps: terminal children stay cached
/// unless `fresh` (a `from_step` reset) forces re-execution, and the attempt
/// counter always continues from the store so a re-run never reuses an
/// earlier attempt's workspace directory.
async fn drive_child<R: AdapterRunner, C: Clock>(
    rt: Arc<StepRuntime<R, C>>,
    step: Step,
    child_id: StepId,
    item: MatrixItem,
    fresh: bool,
) -> (StepId, TaskResult, u32) {
    let prior = rt
        .store
        .lock()
        .state()
        .step(rt.run_id.as_str(), child_id.as_str())
        .cloned();

    if !fresh {
        if let Some(exec) = &prior {
            let cached = match exec.state {
                StepState::Completed => Some(Verdict::Completed),
                // An exhausted child does not get a new budget on resume
                StepState::Failed => Some(Verdict::Failed {
                    retryable: false,
                    timeout: false,
                }),
                _ => None,
            };
            if let Some(verdict) = cached {
                let workspace = rt.workspaces.step_dir(&rt.run_id, &child_id, exec.attempt);
                let result = TaskResult {
                    step_id: child_id.clone(),
                    verdict,
                    tokens: 0,
                    duration_ms: 0,
                    exit_code: exec.exit_code,
                    error: exec.error.clone(),
                    artifacts: Vec::new(),
                    notes: Vec::new(),
                    workspace: Some(workspace),
                };
                return (child_id, result, exec.attempt);
            }
        }
    }

    let budget = attempt_budget(&step);
    // Continue from the highest attempt already observed for this child
    let mut attempt = prior.as_ref().map(|exec| exec.attempt).unwrap_or(0);

    loop {
        attempt += 1;
        if let Err(e) = rt.sink.persist(Event::StepTransition {
            run_id: rt.run_id.clone(),
            step_id: child_id.clone(),
            state: StepState::Running,
            persona: step.persona.clone(),
            message: String::new(),
            tokens_used: 0,
            duration_ms: 0,
            exit_code: None,
            error: None,
            epoch_ms: rt.clock.epoch_ms(),
        }) {
            return store_failure(child_id, e, attempt);
        }

        let result = run_step(
            Arc::clone(&rt),
            step.clone(),
            Some(child_id.clone()),
            Some(item.clone()),
            attempt,
        )
        .await;

        let state = match &result.verdict {
            Verdict::Completed => StepState::Completed,
            Verdict::Cancelled => StepState::Cancelled,
            Verdict::Failed { retryable, .. } => {
                if *retryable && attempt < budget {
                    StepState::Retrying
                } else {
                    StepState::Failed
                }
            }
        };

        if let Err(e) = rt.sink.persist(Event::StepTransition {
            run_id: rt.run_id.clone(),
            step_id: child_id.clone(),
            state,
            persona: step.persona.clone(),
            message: String::new(),
            tokens_used: result.tokens,
            duration_ms: result.duration_ms,
            exit_code: result.exit_code,
            error: result.error.clone(),
            epoch_ms: rt.clock.epoch_ms(),
        }) {
            return store_failure(child_id, e, attempt);
        }

        if state == StepState::Completed {
            for artifact in &result.artifacts {
                if let Err(e) = rt.sink.persist(Event::ArtifactRecorded {
                    artifact: artifact.clone(),
                }) {
                    return store_failure(child_id, e, attempt);
                }
            }
        }

        if state != StepState::Retrying {
            return (child_id, result, attempt);
        }
    }
}

/// A WAL write failure for a child surfaces as a failed child; the parent
/// aggregates it like any other child failure instead of losing it.
fn store_failure(
    child_id: StepId,
    error: RuntimeError,
    attempt: u32,
) -> (StepId, TaskResult, u32) {
    let result = TaskResult::failed(
        child_id.clone(),
        format!("state store write failed: {error}"),
        false,
    );
    (child_id, result, attempt)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
