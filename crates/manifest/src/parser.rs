// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manifest and pipeline parsing (YAML and JSON).

use crate::manifest::Manifest;
use crate::pipeline::{Exec, Pipeline};
use crate::template::template_refs;
use std::path::Path;
use thiserror::Error;

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Pick the format from a file extension; YAML is the default.
    pub fn from_path(path: &Path) -> Format {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Errors that can occur during config parsing
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid format for {location}: {message}")]
    InvalidFormat { location: String, message: String },
}

/// Template namespaces valid in exec sources and branch templates.
///
/// Each entry maps an invalid prefix to a suggestion for the user.
const INVALID_NAMESPACES: &[(&str, &str)] = &[
    ("var.", "use {{ input.<name> }} to reference run input"),
    ("local.", "locals are not available; pass values through input"),
    (
        "step.",
        "steps communicate through injected artifacts, not template refs",
    ),
    ("env.", "declare the variable in the step env block instead"),
];

/// Parse a manifest from the given content in the specified format.
pub fn parse_manifest(content: &str, format: Format) -> Result<Manifest, ParseError> {
    // 1. Serde does the heavy lifting
    let mut manifest: Manifest = match format {
        Format::Yaml => serde_yaml::from_str(content)?,
        Format::Json => serde_json::from_str(content)?,
    };

    // 2. Name fixup — inject map keys into .name fields
    for (name, adapter) in &mut manifest.adapters {
        adapter.name = name.clone();
    }
    for (name, persona) in &mut manifest.personas {
        persona.name = name.clone();
    }

    Ok(manifest)
}

/// Parse a pipeline from the given content in the specified format.
pub fn parse_pipeline(content: &str, format: Format) -> Result<Pipeline, ParseError> {
    let pipeline: Pipeline = match format {
        Format::Yaml => serde_yaml::from_str(content)?,
        Format::Json => serde_json::from_str(content)?,
    };

    // Structural checks that don't need the manifest
    for (i, step) in pipeline.steps.iter().enumerate() {
        if step.id.is_empty() {
            return Err(ParseError::InvalidFormat {
                location: format!("steps[{}].id", i),
                message: "step id is required".to_string(),
            });
        }

        // Memory strategy is always "fresh"
        if step.memory.strategy != "fresh" {
            return Err(ParseError::InvalidFormat {
                location: format!("steps[{}].memory.strategy", i),
                message: format!(
                    "unsupported memory strategy '{}'; only 'fresh' is supported",
                    step.memory.strategy
                ),
            });
        }

        if let Some(strategy) = &step.strategy {
            if strategy.kind != "matrix" {
                return Err(ParseError::InvalidFormat {
                    location: format!("steps[{}].strategy.type", i),
                    message: format!(
                        "unsupported strategy '{}'; only 'matrix' is supported",
                        strategy.kind
                    ),
                });
            }
        }

        validate_exec_template(&step.exec, &step.id)?;
        if let Some(branch) = &step.workspace.branch {
            validate_template_namespaces(branch, &format!("steps.{}.workspace.branch", step.id))?;
        }
    }

    Ok(pipeline)
}

/// Load a manifest from disk, picking the format from the extension.
pub fn load_manifest(path: &Path) -> Result<Manifest, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let manifest = parse_manifest(&content, Format::from_path(path))?;
    tracing::debug!(
        path = %path.display(),
        adapters = manifest.adapters.len(),
        personas = manifest.personas.len(),
        "manifest loaded"
    );
    Ok(manifest)
}

/// Load a pipeline from disk, picking the format from the extension.
pub fn load_pipeline(path: &Path) -> Result<Pipeline, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let pipeline = parse_pipeline(&content, Format::from_path(path))?;
    tracing::debug!(
        path = %path.display(),
        name = pipeline.name(),
        steps = pipeline.steps.len(),
        "pipeline loaded"
    );
    Ok(pipeline)
}

fn validate_exec_template(exec: &Exec, step_id: &str) -> Result<(), ParseError> {
    let (text, field) = match exec {
        Exec::Prompt { source } => (source.as_str(), "exec.source"),
        Exec::Command { command, .. } => (command.as_str(), "exec.command"),
        Exec::SlashCommand { args, .. } => match args {
            Some(args) => (args.as_str(), "exec.args"),
            None => return Ok(()),
        },
    };
    validate_template_namespaces(text, &format!("steps.{}.{}", step_id, field))
}

/// Reject template references in namespaces that don't exist at run time.
fn validate_template_namespaces(text: &str, location: &str) -> Result<(), ParseError> {
    for var_name in template_refs(text) {
        for &(prefix, hint) in INVALID_NAMESPACES {
            if var_name.starts_with(prefix) {
                return Err(ParseError::InvalidFormat {
                    location: location.to_string(),
                    message: format!(
                        "template reference {{{{ {} }}}} is not available; {}",
                        var_name, hint,
                    ),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
