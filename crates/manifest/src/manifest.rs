// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manifest model: adapters, personas, runtime configuration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use wave_core::Permissions;

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_mode() -> String {
    "headless".to_string()
}

fn default_output_format() -> String {
    "stream-json".to_string()
}

fn default_success_exit_codes() -> Vec<i32> {
    vec![0]
}

/// The project manifest, immutable after load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub adapters: IndexMap<String, Adapter>,
    #[serde(default)]
    pub personas: IndexMap<String, Persona>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_mounts: Vec<SkillMount>,
}

impl Manifest {
    /// Resolve a persona together with its adapter.
    pub fn resolve_persona(&self, name: &str) -> Option<(&Persona, &Adapter)> {
        let persona = self.personas.get(name)?;
        let adapter = self.adapters.get(&persona.adapter)?;
        Some((persona, adapter))
    }

    /// Merged (adapter defaults + persona overrides) permissions for a persona.
    pub fn effective_permissions(&self, name: &str) -> Option<Permissions> {
        let (persona, adapter) = self.resolve_persona(name)?;
        Some(Permissions::merge(
            &adapter.default_permissions,
            &persona.permissions,
        ))
    }
}

/// Free-form metadata block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The subprocess runtime wrapping an LLM CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Adapter {
    /// Injected from the map key at parse time
    #[serde(skip)]
    pub name: String,
    pub binary: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Files the runner materializes into each workspace (e.g. `CLAUDE.md`)
    #[serde(default)]
    pub project_files: Vec<String>,
    #[serde(default)]
    pub default_permissions: Permissions,
    /// Template for hook wiring in the rendered settings file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks_template: Option<String>,
    /// Exit codes treated as successful completion
    #[serde(default = "default_success_exit_codes")]
    pub success_exit_codes: Vec<i32>,
}

/// A role the subprocess plays: adapter + system prompt + permissions + hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Persona {
    /// Injected from the map key at parse time
    #[serde(skip)]
    pub name: String,
    /// Adapter this persona runs on
    pub adapter: String,
    #[serde(alias = "system_prompt")]
    pub system_prompt_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<PersonaSandbox>,
}

/// Hook commands run around tool use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_tool_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_tool_use: Option<String>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.pre_tool_use.is_none() && self.post_tool_use.is_none()
    }
}

/// Network allowlist for a persona.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaSandbox {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// A skill directory projected into workspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillMount {
    pub name: String,
    pub path: PathBuf,
}

fn default_workers() -> u32 {
    4
}

fn default_timeout_minutes() -> f64 {
    30.0
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".wave/workspaces")
}

/// Runtime knobs shared by every pipeline in the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub max_concurrent_workers: u32,
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: f64,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Mirror published events into `.wave/traces/<run_id>.jsonl`
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub meta_pipeline: MetaPipelineLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: default_workers(),
            default_timeout_minutes: default_timeout_minutes(),
            workspace_root: default_workspace_root(),
            relay: RelayConfig::default(),
            sandbox: SandboxConfig::default(),
            trace: false,
            meta_pipeline: MetaPipelineLimits::default(),
        }
    }
}

fn default_threshold_percent() -> u8 {
    80
}

fn default_min_tokens() -> u64 {
    1000
}

fn default_context_window() -> u64 {
    200_000
}

fn default_summarizer() -> String {
    "summarizer".to_string()
}

/// Relay compaction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Compaction trigger as percent of the context window
    #[serde(default = "default_threshold_percent")]
    pub token_threshold_percent: u8,
    /// Never compact contexts below this many tokens
    #[serde(default = "default_min_tokens")]
    pub min_tokens: u64,
    #[serde(default = "default_context_window")]
    pub context_window: u64,
    #[serde(default = "default_summarizer")]
    pub summarizer_persona: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            token_threshold_percent: default_threshold_percent(),
            min_tokens: default_min_tokens(),
            context_window: default_context_window(),
            summarizer_persona: default_summarizer(),
        }
    }
}

/// Environment curation for adapter subprocesses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Host variable names relayed into the curated env (values are never
    /// read by the core itself)
    #[serde(default)]
    pub env_passthrough: Vec<String>,
    /// Extra variables set verbatim for every step
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_max_steps() -> u32 {
    50
}

fn default_max_personas() -> u32 {
    20
}

/// Limits applied when dynamic pipelines are generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaPipelineLimits {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_personas")]
    pub max_personas: u32,
}

impl Default for MetaPipelineLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_personas: default_max_personas(),
        }
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
