// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wave-manifest: configuration model, parsing, and static validation.
//!
//! A project carries one manifest (`.wave/manifest.yaml`: adapters, personas,
//! runtime) and any number of pipelines (`.wave/pipelines/*.yaml`: steps,
//! dependencies, contracts). Parsing is strict (`deny_unknown_fields`);
//! cross-reference and DAG validation live in [`validate`].

pub mod dag;
pub mod manifest;
pub mod parser;
pub mod pipeline;
pub mod template;
pub mod validate;

pub use dag::{topo_layers, topo_order, CycleError};
pub use manifest::{
    Adapter, Hooks, Manifest, Metadata, MetaPipelineLimits, Persona, PersonaSandbox, RelayConfig,
    RuntimeConfig, SandboxConfig, SkillMount,
};
pub use parser::{
    load_manifest, load_pipeline, parse_manifest, parse_pipeline, Format, ParseError,
};
pub use pipeline::{
    ArtifactInjection, Compaction, Contract, ContractPolicy, Exec, FailurePolicy, Handover,
    InputConfig, ItemsSource, MatrixStrategy, MemoryConfig, Mount, MountMode, OutputArtifact,
    Pipeline, PipelineMetadata, PreCheck, Requires, Step, WorkspaceConfig, WorkspaceKind,
};
pub use template::{escape_for_shell, interpolate, interpolate_shell, template_refs};
pub use validate::{validate, which, Severity, ValidationItem, ValidationReport};
