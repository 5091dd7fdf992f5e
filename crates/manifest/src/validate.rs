// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static validation: cross-references, DAG checks, value ranges.
//!
//! Every rule emits a [`ValidationItem`] with a stable code so callers can
//! filter or suppress individual findings. The scheduler refuses to run while
//! any error-severity item remains; warnings are advisory.

use crate::dag::topo_order;
use crate::manifest::Manifest;
use crate::pipeline::{Exec, Pipeline};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationItem {
    /// Stable rule code (`WV001`…)
    pub code: &'static str,
    pub severity: Severity,
    /// Field path, e.g. `personas.reviewer.temperature`
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl fmt::Display for ValidationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.code, self.severity, self.path, self.message
        )?;
        if let Some(hint) = &self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

/// Aggregated validation findings for a manifest + pipeline set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub items: Vec<ValidationItem>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationItem> {
        self.items.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationItem> {
        self.items
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    fn error(&mut self, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.items.push(ValidationItem {
            code,
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
            hint: None,
        });
    }

    fn error_with_hint(
        &mut self,
        code: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ValidationItem {
            code,
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    fn warning(
        &mut self,
        code: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ValidationItem {
            code,
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
            hint: Some(hint.into()),
        });
    }
}

/// Validate a manifest and its pipelines.
///
/// `project_root` anchors relative file references (system prompts, hook
/// scripts, schema files).
pub fn validate(manifest: &Manifest, pipelines: &[Pipeline], project_root: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_manifest(manifest, project_root, &mut report);
    for pipeline in pipelines {
        validate_pipeline(manifest, pipeline, &mut report);
    }

    report
}

fn validate_manifest(manifest: &Manifest, project_root: &Path, report: &mut ValidationReport) {
    if manifest.kind != "WaveManifest" {
        report.error(
            "WV001",
            "kind",
            format!("expected kind 'WaveManifest', found '{}'", manifest.kind),
        );
    }
    if manifest.api_version != "v1" {
        report.error(
            "WV001",
            "apiVersion",
            format!("unsupported apiVersion '{}'", manifest.api_version),
        );
    }

    for (name, adapter) in &manifest.adapters {
        if which(&adapter.binary).is_none() {
            report.warning(
                "WV005",
                format!("adapters.{}.binary", name),
                format!("binary '{}' not found on PATH", adapter.binary),
                "resolution happens again at run time; install the CLI before running",
            );
        }
    }

    for (name, persona) in &manifest.personas {
        if !manifest.adapters.contains_key(&persona.adapter) {
            report.error_with_hint(
                "WV002",
                format!("personas.{}.adapter", name),
                format!("unknown adapter '{}'", persona.adapter),
                format!("known adapters: {}", sorted_keys(&manifest.adapters)),
            );
        }

        let prompt_path = project_root.join(&persona.system_prompt_file);
        if !prompt_path.exists() {
            report.error(
                "WV003",
                format!("personas.{}.system_prompt_file", name),
                format!("file not found: {}", prompt_path.display()),
            );
        }

        for (hook_name, command) in [
            ("pre_tool_use", &persona.hooks.pre_tool_use),
            ("post_tool_use", &persona.hooks.post_tool_use),
        ] {
            if let Some(command) = command {
                validate_hook_command(command, name, hook_name, project_root, report);
            }
        }

        if let Some(t) = persona.temperature {
            if !(0.0..=1.0).contains(&t) {
                report.error(
                    "WV010",
                    format!("personas.{}.temperature", name),
                    format!("temperature {} out of range [0.0, 1.0]", t),
                );
            }
        }
    }

    let workers = manifest.runtime.max_concurrent_workers;
    if !(1..=10).contains(&workers) {
        report.error(
            "WV012",
            "runtime.max_concurrent_workers",
            format!("max_concurrent_workers {} out of range [1, 10]", workers),
        );
    }

    let threshold = manifest.runtime.relay.token_threshold_percent;
    if !(50..=95).contains(&threshold) {
        report.error(
            "WV011",
            "runtime.relay.token_threshold_percent",
            format!("token_threshold_percent {} out of range [50, 95]", threshold),
        );
    }
}

/// A hook command whose first token looks like a path must exist on disk.
fn validate_hook_command(
    command: &str,
    persona: &str,
    hook: &str,
    project_root: &Path,
    report: &mut ValidationReport,
) {
    let Some(first) = command.split_whitespace().next() else {
        return;
    };
    if !first.contains('/') {
        return; // bare binary name, resolved on PATH at run time
    }
    let path = if Path::new(first).is_absolute() {
        Path::new(first).to_path_buf()
    } else {
        project_root.join(first)
    };
    if !path.exists() {
        report.error(
            "WV004",
            format!("personas.{}.hooks.{}", persona, hook),
            format!("hook script not found: {}", path.display()),
        );
    }
}

fn validate_pipeline(manifest: &Manifest, pipeline: &Pipeline, report: &mut ValidationReport) {
    let pname = pipeline.name();

    if pipeline.kind != "WavePipeline" {
        report.error(
            "WV001",
            format!("{}.kind", pname),
            format!("expected kind 'WavePipeline', found '{}'", pipeline.kind),
        );
    }

    let max_steps = manifest.runtime.meta_pipeline.max_steps as usize;
    if pipeline.steps.len() > max_steps {
        report.error(
            "WV015",
            format!("{}.steps", pname),
            format!(
                "pipeline has {} steps, exceeding the limit of {}",
                pipeline.steps.len(),
                max_steps
            ),
        );
    }

    // (a) unique IDs
    let mut seen = HashSet::new();
    for step in &pipeline.steps {
        if !seen.insert(step.id.as_str()) {
            report.error(
                "WV006",
                format!("{}.steps.{}", pname, step.id),
                format!("duplicate step id '{}'", step.id),
            );
        }
    }

    // (b) dependencies reference defined IDs
    let ids: HashSet<&str> = pipeline.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &pipeline.steps {
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                report.error(
                    "WV007",
                    format!("{}.steps.{}.dependencies", pname, step.id),
                    format!("unknown dependency '{}'", dep),
                );
            }
        }
    }

    // (c) acyclic; only meaningful once references resolve
    if let Err(cycle) = topo_order(&pipeline.steps) {
        report.error(
            "WV008",
            format!("{}.steps", pname),
            cycle.to_string(),
        );
    }

    for step in &pipeline.steps {
        let path = format!("{}.steps.{}", pname, step.id);

        match (&step.persona, step.exec.uses_adapter()) {
            (Some(persona), _) => {
                if !manifest.personas.contains_key(persona) {
                    report.error_with_hint(
                        "WV009",
                        format!("{}.persona", path),
                        format!("unknown persona '{}'", persona),
                        format!("known personas: {}", sorted_keys(&manifest.personas)),
                    );
                }
            }
            (None, true) => {
                report.error(
                    "WV009",
                    format!("{}.persona", path),
                    "persona is required unless exec.type is 'command'",
                );
            }
            (None, false) => {}
        }

        if let Some(strategy) = &step.strategy {
            if strategy.max_concurrency == 0 {
                report.error(
                    "WV013",
                    format!("{}.strategy.max_concurrency", path),
                    "max_concurrency must be at least 1",
                );
            }
            if !step.dependencies.contains(&strategy.items_source.step) {
                report.error_with_hint(
                    "WV014",
                    format!("{}.strategy.items_source.step", path),
                    format!(
                        "items source '{}' is not a dependency of this step",
                        strategy.items_source.step
                    ),
                    "add it to the step's dependencies so expansion happens after it completes",
                );
            }
        }

        if step.handover.compaction.is_some() {
            let summarizer = &manifest.runtime.relay.summarizer_persona;
            if !manifest.personas.contains_key(summarizer) {
                report.warning(
                    "WV016",
                    format!("{}.handover.compaction", path),
                    format!("summarizer persona '{}' is not defined", summarizer),
                    "compaction will be skipped with a warning event at run time",
                );
            }
        }

        for injection in &step.memory.inject_artifacts {
            if !ids.contains(injection.step.as_str()) {
                report.error(
                    "WV007",
                    format!("{}.memory.inject_artifacts", path),
                    format!("unknown step '{}' in artifact injection", injection.step),
                );
            }
        }

        // Exec shape sanity: slash command names must not carry the slash
        if let Exec::SlashCommand { command, .. } = &step.exec {
            if command.starts_with('/') {
                report.error_with_hint(
                    "WV001",
                    format!("{}.exec.command", path),
                    "slash command name must not start with '/'",
                    "the '/' prefix is added automatically",
                );
            }
        }
    }
}

/// Resolve a binary on PATH.
pub fn which(binary: &str) -> Option<std::path::PathBuf> {
    if binary.contains('/') {
        let path = Path::new(binary);
        return path.exists().then(|| path.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Sort and join keys from an IndexMap for deterministic error messages.
fn sorted_keys<V>(map: &indexmap::IndexMap<String, V>) -> String {
    let mut v: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
    v.sort();
    v.join(", ")
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
