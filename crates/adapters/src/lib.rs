// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapter layer: everything that touches the LLM CLI subprocess.
//!
//! The engine resolves a (persona, permissions, exec) triple into an
//! [`Invocation`]; this crate materializes the adapter's project files,
//! builds the curated environment, spawns the binary in its own process
//! group, captures the NDJSON stream, and enforces the timeout by killing
//! the whole group.

pub mod env;
pub mod runner;
pub mod settings;
pub mod stream;

pub use env::curated_env;
pub use runner::{
    claude_argv, AdapterError, AdapterResult, AdapterRunner, ClaudeRunner, FailureReason,
    Invocation, ToolCall, KILL_GRACE,
};
pub use settings::materialize_project_files;
pub use stream::{StreamRecord, ToolUse, Usage};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeCall, FakeRunner, ScriptedOutcome};
