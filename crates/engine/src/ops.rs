// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operations facade consumed by the CLI collaborator.
//!
//! Each operation is a thin orchestration over the engine components and
//! returns typed values; argument parsing, rendering, and exit-code
//! plumbing stay in the frontend. Run references accept unique ID prefixes.

use crate::bus::EventBus;
use crate::error::RuntimeError;
use crate::executor::{RunExecutor, RunReport};
use crate::workspace::WorkspaceManager;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wave_adapters::AdapterRunner;
use wave_core::{
    Artifact, Clock, Event, IdGen, Run, RunId, RunStatus, StepExecution, StreamEvent, SystemClock,
    UuidIdGen,
};
use wave_manifest::{topo_layers, validate, Manifest, Pipeline, ValidationReport};
use wave_storage::StateStore;

/// State database location relative to the project root.
pub const STATE_DIR: &str = ".wave/state.db";

/// Options for starting a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit run ID (tests, replays); defaults to a fresh UUID
    pub run_id: Option<String>,
    pub tags: Vec<String>,
}

/// One run with its step records, for status rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run: Run,
    pub steps: Vec<StepExecution>,
    /// Tokens attributed per persona across completed attempts
    pub tokens_by_persona: BTreeMap<String, u64>,
}

/// Resolved dry-run plan: topological layers with personas and deps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub pipeline: String,
    pub layers: Vec<Vec<PlanStep>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub id: String,
    pub persona: Option<String>,
    pub dependencies: Vec<String>,
    pub matrix: bool,
}

/// Server-side filter for `logs`.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Only events of this step (matrix children included by prefix)
    pub step: Option<String>,
    /// Only these states; empty means all
    pub states: Vec<wave_core::StreamState>,
}

impl LogFilter {
    fn accepts(&self, event: &StreamEvent) -> bool {
        if let Some(step) = &self.step {
            let matches = event
                .step_id
                .as_ref()
                .is_some_and(|s| s.as_str() == step || s.as_str().starts_with(&format!("{step}#")));
            if !matches {
                return false;
            }
        }
        self.states.is_empty() || self.states.contains(&event.state)
    }
}

/// Which workspaces `clean` removes.
#[derive(Debug, Clone, Default)]
pub struct CleanPredicate {
    /// Specific run IDs (prefix-resolved before matching)
    pub run_ids: Vec<String>,
    /// Match runs in any of these terminal statuses
    pub statuses: Vec<RunStatus>,
    /// Everything with a terminal status
    pub all: bool,
}

/// What `clean` deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub removed: Vec<PathBuf>,
}

/// Resources `list` can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Pipelines,
    Personas,
    Adapters,
    Runs,
}

/// The engine facade: one per project, owning the actor store handle.
pub struct Engine<R: AdapterRunner + 'static> {
    manifest: Arc<Manifest>,
    pipelines: Vec<Arc<Pipeline>>,
    project_root: PathBuf,
    store: Arc<Mutex<StateStore>>,
    bus: EventBus,
    runner: Arc<R>,
    clock: SystemClock,
}

impl<R: AdapterRunner + 'static> Engine<R> {
    /// Open the project state and build the facade.
    pub fn new(
        manifest: Manifest,
        pipelines: Vec<Pipeline>,
        project_root: impl Into<PathBuf>,
        runner: R,
    ) -> Result<Self, RuntimeError> {
        let project_root = project_root.into();
        let store = StateStore::open(&project_root.join(STATE_DIR))?;
        Ok(Self {
            manifest: Arc::new(manifest),
            pipelines: pipelines.into_iter().map(Arc::new).collect(),
            project_root,
            store: Arc::new(Mutex::new(store)),
            bus: EventBus::default(),
            runner: Arc::new(runner),
            clock: SystemClock,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Static validation of the loaded manifest and pipelines.
    pub fn validate(&self) -> ValidationReport {
        let pipelines: Vec<Pipeline> = self.pipelines.iter().map(|p| (**p).clone()).collect();
        validate(&self.manifest, &pipelines, &self.project_root)
    }

    fn pipeline(&self, name: &str) -> Result<Arc<Pipeline>, RuntimeError> {
        self.pipelines
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| RuntimeError::PipelineNotFound(name.to_string()))
    }

    fn resolve_run(&self, run_ref: &str) -> Result<Run, RuntimeError> {
        self.store
            .lock()
            .state()
            .get_run(run_ref)
            .cloned()
            .ok_or_else(|| RuntimeError::RunNotFound(run_ref.to_string()))
    }

    /// Start a new run of a pipeline and drive it to a terminal status.
    ///
    /// Refuses to start while any error-severity validation finding remains.
    pub async fn run(
        &self,
        pipeline_name: &str,
        input: BTreeMap<String, String>,
        options: RunOptions,
    ) -> Result<RunReport, RuntimeError> {
        let report = self.validate();
        if report.has_errors() {
            return Err(RuntimeError::Config { report });
        }

        let pipeline = self.pipeline(pipeline_name)?;

        // Defaults fill gaps; required inputs must resolve
        let mut input = input;
        for (key, value) in &pipeline.input.defaults {
            input.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for required in &pipeline.input.required {
            if !input.contains_key(required) {
                return Err(RuntimeError::MissingInput(required.clone()));
            }
        }

        let run_id = match options.run_id {
            Some(id) => RunId::new(id),
            None => UuidIdGen.next_run_id(),
        };

        {
            let mut store = self.store.lock();
            let (_, stream) = store.append_with_retry(Event::RunCreated {
                run_id: run_id.clone(),
                pipeline: pipeline.name().to_string(),
                input,
                tags: options.tags,
                epoch_ms: self.clock.epoch_ms(),
            })?;
            if let Some(stream) = stream {
                self.bus.publish(stream);
            }
        }

        self.execute(pipeline, run_id, None).await
    }

    /// Resume a run: completed, skipped, and exhausted-failed steps are not
    /// re-executed; `from_step` resets the named step and its descendants so
    /// they run again regardless of prior state.
    pub async fn resume(
        &self,
        run_ref: &str,
        from_step: Option<&str>,
    ) -> Result<RunReport, RuntimeError> {
        let run = self.resolve_run(run_ref)?;
        let pipeline = self.pipeline(&run.pipeline)?;

        // A stale cancellation flag would immediately cancel the resumed
        // run; resuming is an explicit request to keep going.
        let flagged = self
            .store
            .lock()
            .state()
            .cancellation(run.id.as_str())
            .is_some();
        if flagged {
            let mut store = self.store.lock();
            let (_, stream) = store.append_with_retry(Event::CancelCleared {
                run_id: run.id.clone(),
                epoch_ms: self.clock.epoch_ms(),
            })?;
            if let Some(stream) = stream {
                self.bus.publish(stream);
            }
        }

        self.execute(pipeline, run.id, from_step).await
    }

    async fn execute(
        &self,
        pipeline: Arc<Pipeline>,
        run_id: RunId,
        from_step: Option<&str>,
    ) -> Result<RunReport, RuntimeError> {
        let executor = RunExecutor::new(
            Arc::clone(&self.manifest),
            pipeline,
            self.project_root.clone(),
            Arc::clone(&self.store),
            self.bus.clone(),
            Arc::clone(&self.runner),
            self.clock.clone(),
            run_id,
        );
        executor.execute(from_step).await
    }

    /// Flag a run for cancellation. Graceful lets running steps finish;
    /// force tears down their process groups.
    pub fn cancel(&self, run_ref: &str, force: bool) -> Result<(), RuntimeError> {
        let run = self.resolve_run(run_ref)?;
        let mut store = self.store.lock();
        let (_, stream) = store.append_with_retry(Event::CancelRequested {
            run_id: run.id,
            force,
            epoch_ms: self.clock.epoch_ms(),
        })?;
        if let Some(stream) = stream {
            self.bus.publish(stream);
        }
        store.flush()?;
        Ok(())
    }

    /// SIGINT wiring: first interrupt cancels gracefully, the second forces.
    pub fn install_signal_handler(&self, run_ref: &str) -> tokio::task::JoinHandle<()> {
        let run_ref = run_ref.to_string();
        let store = Arc::clone(&self.store);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            for force in [false, true] {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let run_id = {
                    let store = store.lock();
                    store.state().get_run(&run_ref).map(|run| run.id.clone())
                };
                let Some(run_id) = run_id else { return };
                tracing::info!(%run_id, force, "interrupt received, cancelling run");
                let mut store = store.lock();
                let _ = store.append_with_retry(Event::CancelRequested {
                    run_id,
                    force,
                    epoch_ms: clock.epoch_ms(),
                });
                let _ = store.flush();
            }
        })
    }

    /// Summaries of one run or all runs, newest first.
    pub fn status(&self, run_ref: Option<&str>) -> Result<Vec<RunSummary>, RuntimeError> {
        let mut store = self.store.lock();

        let runs: Vec<Run> = match run_ref {
            Some(r) => vec![store
                .state()
                .get_run(r)
                .cloned()
                .ok_or_else(|| RuntimeError::RunNotFound(r.to_string()))?],
            None => {
                let mut runs: Vec<Run> = store.state().runs.values().cloned().collect();
                runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
                runs
            }
        };

        let mut summaries = Vec::with_capacity(runs.len());
        for run in runs {
            let steps: Vec<StepExecution> =
                store.state().run_steps(run.id.as_str()).cloned().collect();

            let mut tokens_by_persona: BTreeMap<String, u64> = BTreeMap::new();
            for event in store.events(Some(run.id.as_str()))? {
                if let (Some(persona), tokens) = (event.persona, event.tokens_used) {
                    if tokens > 0 {
                        *tokens_by_persona.entry(persona).or_default() += tokens;
                    }
                }
            }

            summaries.push(RunSummary {
                run,
                steps,
                tokens_by_persona,
            });
        }
        Ok(summaries)
    }

    /// Persisted events of a run plus a live subscription for what follows.
    pub fn logs(
        &self,
        run_ref: &str,
        filter: &LogFilter,
    ) -> Result<(Vec<StreamEvent>, tokio::sync::broadcast::Receiver<StreamEvent>), RuntimeError>
    {
        let run = self.resolve_run(run_ref)?;
        let receiver = self.bus.subscribe();
        let backlog = self
            .store
            .lock()
            .events(Some(run.id.as_str()))?
            .into_iter()
            .filter(|event| filter.accepts(event))
            .collect();
        Ok((backlog, receiver))
    }

    /// Artifact records of a run, optionally filtered by step.
    pub fn artifacts(
        &self,
        run_ref: &str,
        step: Option<&str>,
    ) -> Result<Vec<Artifact>, RuntimeError> {
        let run = self.resolve_run(run_ref)?;
        Ok(self
            .store
            .lock()
            .state()
            .run_artifacts(run.id.as_str(), step)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Copy a run's artifacts out of their workspaces into `dest`.
    pub async fn export_artifacts(
        &self,
        run_ref: &str,
        dest: &Path,
    ) -> Result<Vec<PathBuf>, RuntimeError> {
        let run = self.resolve_run(run_ref)?;
        let artifacts = self.artifacts(run_ref, None)?;
        let workspaces = self.workspace_manager();

        let mut exported = Vec::new();
        for artifact in artifacts {
            let attempt = self
                .store
                .lock()
                .state()
                .step(run.id.as_str(), artifact.step_id.as_str())
                .map(|exec| exec.attempt)
                .unwrap_or(1);
            let source = workspaces
                .step_dir(&run.id, &artifact.step_id, attempt)
                .join(&artifact.path);
            if !source.exists() {
                continue;
            }
            let target = dest.join(artifact.step_id.as_str()).join(&artifact.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target).await?;
            exported.push(target);
        }
        Ok(exported)
    }

    /// Delete workspaces matching the predicate. Terminal-state runs only;
    /// an active run's workspaces are never touched.
    pub async fn clean(&self, predicate: CleanPredicate) -> Result<DeletionReport, RuntimeError> {
        let accepted: Vec<String> = {
            let store = self.store.lock();
            let state = store.state();

            let mut accepted = Vec::new();
            for run in state.runs.values() {
                if !run.status.is_terminal() {
                    continue;
                }
                let matches = predicate.all
                    || predicate.statuses.contains(&run.status)
                    || predicate
                        .run_ids
                        .iter()
                        .any(|r| state.get_run(r).map(|m| m.id == run.id).unwrap_or(false));
                if matches {
                    accepted.push(run.id.to_string());
                }
            }
            accepted
        };

        let workspaces = self.workspace_manager();
        let removed = workspaces
            .reap(|run_dir| accepted.iter().any(|id| id == run_dir))
            .await?;
        Ok(DeletionReport { removed })
    }

    /// Enumerate a resource.
    pub fn list(&self, resource: Resource) -> Vec<String> {
        match resource {
            Resource::Pipelines => self
                .pipelines
                .iter()
                .map(|p| p.name().to_string())
                .collect(),
            Resource::Personas => self.manifest.personas.keys().cloned().collect(),
            Resource::Adapters => self.manifest.adapters.keys().cloned().collect(),
            Resource::Runs => {
                let store = self.store.lock();
                let mut runs: Vec<&Run> = store.state().runs.values().collect();
                runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
                runs.iter().map(|run| run.id.to_string()).collect()
            }
        }
    }

    /// Resolved execution plan without spawning any adapter subprocess.
    pub fn dry_run(&self, pipeline_name: &str) -> Result<ExecutionPlan, RuntimeError> {
        let pipeline = self.pipeline(pipeline_name)?;
        let layers = match topo_layers(&pipeline.steps) {
            Ok(layers) => layers,
            // The full validation report names the cycle
            Err(_) => {
                return Err(RuntimeError::Config {
                    report: self.validate(),
                })
            }
        };

        let plan_layers = layers
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .filter_map(|id| pipeline.step(&id).cloned())
                    .map(|step| PlanStep {
                        id: step.id.clone(),
                        persona: step.persona.clone(),
                        dependencies: step.dependencies.clone(),
                        matrix: step.is_matrix(),
                    })
                    .collect()
            })
            .collect();

        Ok(ExecutionPlan {
            pipeline: pipeline.name().to_string(),
            layers: plan_layers,
        })
    }

    fn workspace_manager(&self) -> WorkspaceManager {
        WorkspaceManager::new(
            self.project_root.clone(),
            self.manifest.runtime.workspace_root.clone(),
        )
    }
}

const INIT_MANIFEST: &str = r#"apiVersion: v1
kind: WaveManifest
metadata:
  name: my-project
adapters:
  claude:
    binary: claude
    default_permissions:
      allowed_tools: ["Read", "Edit", "Bash(git *)"]
      deny: ["WebFetch"]
personas:
  analyzer:
    adapter: claude
    system_prompt_file: .wave/personas/analyzer.md
    temperature: 0.2
  summarizer:
    adapter: claude
    system_prompt_file: .wave/personas/summarizer.md
    permissions:
      allowed_tools: ["Read"]
runtime:
  max_concurrent_workers: 4
  default_timeout_minutes: 30
"#;

const INIT_ANALYZER_PROMPT: &str = "# Analyzer\n\nBreak the goal into concrete tasks and write \
them to output/out.json as {\"tasks\": [...]}.\n";

const INIT_SUMMARIZER_PROMPT: &str = "# Summarizer\n\nCondense the step context into \
checkpoint.md with a '## Summary' section and a '## Decisions' section.\n";

const INIT_PIPELINE: &str = r#"kind: WavePipeline
metadata:
  name: example
  description: analyze a goal, then execute each task
input:
  required: [goal]
steps:
  - id: analyze
    persona: analyzer
    exec:
      type: prompt
      source: "Analyze: {{ input.goal }}"
    output_artifacts:
      - name: out
        path: output/out.json
        type: json
  - id: exec
    persona: analyzer
    dependencies: [analyze]
    strategy:
      type: matrix
      items_source:
        step: analyze
        artifact: out
        item_key: tasks
      max_concurrency: 2
    exec:
      type: prompt
      source: "Do this task: {{ task }}"
"#;

/// Scaffold a `.wave/` project tree. Existing files are left alone unless
/// `force` is set.
pub fn init(project_root: &Path, force: bool) -> Result<Vec<PathBuf>, RuntimeError> {
    let files: &[(&str, &str)] = &[
        (".wave/manifest.yaml", INIT_MANIFEST),
        (".wave/personas/analyzer.md", INIT_ANALYZER_PROMPT),
        (".wave/personas/summarizer.md", INIT_SUMMARIZER_PROMPT),
        (".wave/pipelines/example.yaml", INIT_PIPELINE),
    ];

    let mut written = Vec::new();
    for (rel, content) in files {
        let path = project_root.join(rel);
        if path.exists() && !force {
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
