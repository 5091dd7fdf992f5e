// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.
//!
//! Step-scoped failures are wrapped with `{run_id, step_id, attempt}` before
//! they surface; the original cause stays recoverable through `source()`.

use crate::contract::ContractError;
use crate::matrix::MatrixError;
use crate::workspace::WorkspaceError;
use thiserror::Error;
use wave_adapters::AdapterError;
use wave_core::{RunId, StepId};
use wave_manifest::{ParseError, ValidationReport};
use wave_storage::StateStoreError;

/// Errors that can occur while driving a run.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration invalid: {} error(s)", report.errors().count())]
    Config { report: ValidationReport },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StateStoreError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("unknown persona '{persona}' for step '{step}'")]
    PersonaNotFound { persona: String, step: String },

    #[error("required input '{0}' missing")]
    MissingInput(String),

    #[error("run {0} is still active")]
    RunActive(RunId),

    /// Step-scoped wrapper: the original cause is the `source`.
    #[error("[{run_id}/{step_id} attempt {attempt}] {source}")]
    StepScoped {
        run_id: RunId,
        step_id: StepId,
        attempt: u32,
        #[source]
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Wrap a step-scoped error with its execution context.
    pub fn scoped(self, run_id: &RunId, step_id: &StepId, attempt: u32) -> RuntimeError {
        RuntimeError::StepScoped {
            run_id: run_id.clone(),
            step_id: step_id.clone(),
            attempt,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
