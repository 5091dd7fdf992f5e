// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Matrix fanout: expansion and merge.
//!
//! A matrix step expands into `<step_id>#<index>` children, one per item of
//! the upstream task list. After all children finish, their `output/` trees
//! are union-merged into the parent's output; two children writing the same
//! path with different bytes is a conflict and fails the step.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use wave_core::StepId;

/// Errors from matrix expansion and merge
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("items source unreadable at {path}: {message}")]
    Source { path: String, message: String },
    #[error("items source has no '{key}' array")]
    MissingKey { key: String },
    #[error("matrix merge conflict: {}", files.join(", "))]
    Conflict { files: Vec<String> },
    #[error("{} matrix child(ren) failed: {}", children.len(), summarize(children))]
    Children { children: Vec<(StepId, String)> },
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn summarize(children: &[(StepId, String)]) -> String {
    children
        .iter()
        .map(|(id, error)| format!("{}: {}", id, error))
        .collect::<Vec<_>>()
        .join("; ")
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> MatrixError + '_ {
    move |source| MatrixError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// One expansion item, bound to `{{ task }}` in the child's exec source.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixItem {
    pub index: usize,
    pub value: serde_json::Value,
}

impl MatrixItem {
    /// Template bindings contributed by this item.
    ///
    /// `task` is the item itself (string items verbatim, everything else as
    /// compact JSON); object items additionally bind `task.<field>` for each
    /// scalar field.
    pub fn bindings(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        match &self.value {
            serde_json::Value::String(s) => vars.push(("task".to_string(), s.clone())),
            other => {
                vars.push(("task".to_string(), other.to_string()));
                if let serde_json::Value::Object(map) = other {
                    for (key, value) in map {
                        let rendered = match value {
                            serde_json::Value::String(s) => s.clone(),
                            scalar => scalar.to_string(),
                        };
                        vars.push((format!("task.{}", key), rendered));
                    }
                }
            }
        }
        vars
    }
}

/// Read the matrix items from an upstream artifact file.
pub fn load_items(artifact_path: &Path, item_key: &str) -> Result<Vec<MatrixItem>, MatrixError> {
    let content = std::fs::read_to_string(artifact_path).map_err(|e| MatrixError::Source {
        path: artifact_path.display().to_string(),
        message: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| MatrixError::Source {
            path: artifact_path.display().to_string(),
            message: e.to_string(),
        })?;

    let items = value
        .get(item_key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| MatrixError::MissingKey {
            key: item_key.to_string(),
        })?;

    Ok(items
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, value)| MatrixItem { index, value })
        .collect())
}

/// Union-merge the children's `output/` trees into `dest`.
///
/// Identical bytes from multiple children are fine; diverging bytes for the
/// same relative path fail the whole step with the conflicting file list.
pub fn merge_outputs(
    children: &[(StepId, PathBuf)],
    dest: &Path,
) -> Result<Vec<PathBuf>, MatrixError> {
    std::fs::create_dir_all(dest).map_err(io_err(dest))?;

    // rel path → (digest, first writer)
    let mut seen: HashMap<PathBuf, (String, StepId)> = HashMap::new();
    let mut conflicts: Vec<String> = Vec::new();
    let mut merged: Vec<PathBuf> = Vec::new();

    for (child_id, child_output) in children {
        if !child_output.exists() {
            continue;
        }
        for file in walk_files(child_output)? {
            let rel = file
                .strip_prefix(child_output)
                .unwrap_or(&file)
                .to_path_buf();
            let digest = file_digest(&file)?;

            match seen.get(&rel) {
                Some((existing, first_writer)) if *existing != digest => {
                    conflicts.push(format!(
                        "{} ({} vs {})",
                        rel.display(),
                        first_writer,
                        child_id
                    ));
                    continue;
                }
                Some(_) => continue, // identical bytes, union is trivial
                None => {}
            }

            let target = dest.join(&rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            std::fs::copy(&file, &target).map_err(io_err(&target))?;
            seen.insert(rel.clone(), (digest, child_id.clone()));
            merged.push(rel);
        }
    }

    if conflicts.is_empty() {
        merged.sort();
        Ok(merged)
    } else {
        conflicts.sort();
        Err(MatrixError::Conflict { files: conflicts })
    }
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, MatrixError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(io_err(&dir))?;
        for entry in entries {
            let entry = entry.map_err(io_err(&dir))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn file_digest(path: &Path) -> Result<String, MatrixError> {
    let bytes = std::fs::read(path).map_err(io_err(path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[path = "matrix_tests.rs"]
mod tests;
