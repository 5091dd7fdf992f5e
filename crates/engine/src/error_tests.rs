// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::error::Error as _;

#[test]
fn step_scoped_wraps_with_context() {
    let inner = RuntimeError::RunNotFound("run-9".to_string());
    let scoped = inner.scoped(&RunId::new("run-1"), &StepId::new("analyze"), 2);

    let message = scoped.to_string();
    assert!(message.contains("run-1/analyze"));
    assert!(message.contains("attempt 2"));
    assert!(message.contains("run not found: run-9"));
}

#[test]
fn original_cause_is_recoverable_by_unwrapping() {
    let inner = RuntimeError::PipelineNotFound("demo".to_string());
    let scoped = inner.scoped(&RunId::new("r"), &StepId::new("s"), 1);

    let source = scoped.source().unwrap();
    assert!(source.to_string().contains("pipeline not found: demo"));
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::other("disk gone");
    let err: RuntimeError = io.into();
    assert!(err.to_string().contains("disk gone"));
}
