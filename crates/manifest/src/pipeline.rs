// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline model: steps, dependencies, contracts, workspace, matrix.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// A pipeline declaration (`kind: WavePipeline`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    #[serde(default)]
    pub kind: String,
    pub metadata: PipelineMetadata,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Requires>,
    pub steps: Vec<Step>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Look up a step by ID.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step IDs no other step depends on (the pipeline's terminal steps).
    pub fn terminal_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| !self.steps.iter().any(|o| o.dependencies.contains(&s.id)))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// IDs of all transitive dependents of `id`, in declaration order.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for step in &self.steps {
                if step.dependencies.contains(&current) && !out.contains(&step.id) {
                    out.push(step.id.clone());
                    frontier.push(step.id.clone());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared pipeline inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub defaults: HashMap<String, String>,
}

/// Skills and tools a pipeline requires at run time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requires {
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// One DAG node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub id: String,
    /// Persona ref; required unless `exec.type` is `command`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    pub exec: Exec,
    #[serde(default)]
    pub output_artifacts: Vec<OutputArtifact>,
    #[serde(default)]
    pub handover: Handover,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MatrixStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<PreCheck>,
    /// Step-declared env appended to the curated environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Overrides `runtime.default_timeout_minutes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<f64>,
}

impl Step {
    pub fn is_matrix(&self) -> bool {
        self.strategy.is_some()
    }
}

fn default_memory_strategy() -> String {
    "fresh".to_string()
}

/// Step memory policy. The only supported strategy is `fresh`: every attempt
/// starts from a clean workspace with declared injections only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub inject_artifacts: Vec<ArtifactInjection>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            strategy: default_memory_strategy(),
            inject_artifacts: Vec::new(),
        }
    }
}

/// Reference to an upstream artifact copied into this step's workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactInjection {
    pub step: String,
    pub artifact: String,
    #[serde(rename = "as")]
    pub as_name: String,
}

/// Workspace type for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkspaceKind {
    /// Plain directory under the workspace root
    #[default]
    Folder,
    /// Git worktree on a template-resolved branch
    Worktree,
}

impl Serialize for WorkspaceKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WorkspaceKind::Folder => serializer.serialize_str(""),
            WorkspaceKind::Worktree => serializer.serialize_str("worktree"),
        }
    }
}

impl<'de> Deserialize<'de> for WorkspaceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "folder" => Ok(WorkspaceKind::Folder),
            "worktree" => Ok(WorkspaceKind::Worktree),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["", "folder", "worktree"],
            )),
        }
    }
}

/// Per-step workspace configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    #[serde(default, rename = "type")]
    pub kind: WorkspaceKind,
    /// Overrides `runtime.workspace_root` for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Branch template for worktree workspaces (e.g. `wave/{{ run_id }}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount: Vec<Mount>,
}

/// A host path projected into the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mount {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: MountMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    #[default]
    Readonly,
    Readwrite,
}

/// What the step actually executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Exec {
    /// Prompt rendered and passed to the adapter binary
    Prompt { source: String },
    /// Shell command run in the workspace, bypassing the LLM
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<String>,
    },
    /// Adapter slash command; the name is auto-prefixed with `/`
    SlashCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<String>,
    },
}

impl Exec {
    /// Whether this exec invokes the adapter binary (vs a plain shell command).
    pub fn uses_adapter(&self) -> bool {
        !matches!(self, Exec::Command { .. })
    }
}

fn default_artifact_type() -> String {
    "file".to_string()
}

/// A file the step declares as output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputArtifact {
    pub name: String,
    /// Workspace-relative path
    pub path: String,
    #[serde(default = "default_artifact_type", rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Handover boundary: contract check plus optional relay compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Handover {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<Compaction>,
}

fn default_trigger() -> f64 {
    0.8
}

/// Relay compaction override for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Compaction {
    /// Utilization fraction of the context window that triggers compaction
    #[serde(default = "default_trigger")]
    pub trigger: f64,
}

impl Default for Compaction {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
        }
    }
}

/// Post-step output validation.
// No deny_unknown_fields here: serde does not support it together with the
// flattened policy fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contract {
    /// Validate a workspace file against a draft-07 JSON schema
    JsonSchema {
        /// Workspace-relative file to validate
        source: String,
        /// Inline schema; exclusive with `schema_path`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<serde_json::Value>,
        /// Schema file path relative to the project root
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_path: Option<PathBuf>,
        #[serde(flatten)]
        policy: ContractPolicy,
    },
    /// Run a command in the workspace; success iff exit code zero
    TestSuite {
        command: String,
        #[serde(flatten)]
        policy: ContractPolicy,
    },
    /// Compile the source against a declared interface via `tsc` if present
    TypescriptInterface {
        source: String,
        interface: String,
        #[serde(flatten)]
        policy: ContractPolicy,
    },
    /// Verify required `##` sections exist in a markdown artifact
    Markdownspec {
        source: String,
        sections: Vec<String>,
        #[serde(flatten)]
        policy: ContractPolicy,
    },
}

impl Contract {
    pub fn policy(&self) -> &ContractPolicy {
        match self {
            Contract::JsonSchema { policy, .. }
            | Contract::TestSuite { policy, .. }
            | Contract::TypescriptInterface { policy, .. }
            | Contract::Markdownspec { policy, .. } => policy,
        }
    }
}

/// Shared retry/halt policy fields of every contract type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractPolicy {
    #[serde(default = "default_true")]
    pub must_pass: bool,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ContractPolicy {
    fn default() -> Self {
        Self {
            must_pass: true,
            on_failure: FailurePolicy::default(),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Retry,
    Halt,
}

fn default_item_key() -> String {
    "tasks".to_string()
}

fn default_max_concurrency() -> u32 {
    4
}

fn default_matrix_type() -> String {
    "matrix".to_string()
}

/// Fan-out expansion over items produced by an upstream step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixStrategy {
    #[serde(default = "default_matrix_type", rename = "type")]
    pub kind: String,
    pub items_source: ItemsSource,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

/// Where the matrix items come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemsSource {
    /// Upstream step ID
    pub step: String,
    /// Artifact name declared by the upstream step
    pub artifact: String,
    /// Key of the array inside the artifact JSON
    #[serde(default = "default_item_key")]
    pub item_key: String,
}

/// Pre-step check evaluated before any subprocess is spawned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum PreCheck {
    /// Workspace-relative (after injection) or project file must exist
    FileExists { path: String },
    /// Command must exit zero in the workspace
    Command { command: String },
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
