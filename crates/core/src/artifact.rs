// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact records.
//!
//! An artifact is a file a step declares as output, addressable by
//! `(step_id, name)` for injection into downstream workspaces. Paths are
//! stored workspace-relative so records stay valid if the workspace root
//! moves between hosts.

use crate::run::RunId;
use crate::step::StepId;
use serde::{Deserialize, Serialize};

/// A file produced by a step and declared in its `output_artifacts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub run_id: RunId,
    pub step_id: StepId,
    pub name: String,
    /// Workspace-relative path
    pub path: String,
    /// Declared artifact type (e.g. "json", "markdown", "source")
    #[serde(rename = "type")]
    pub kind: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub created_at_ms: u64,
}

impl Artifact {
    /// Stable lookup key for injection resolution.
    pub fn key(&self) -> (StepId, String) {
        (self.step_id.clone(), self.name.clone())
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
