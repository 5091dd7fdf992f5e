// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Wave execution engine: DAG scheduling, step runtime, contracts, relay
//! compaction, matrix fanout, and the operations facade the CLI consumes.

pub mod bus;
mod contract;
mod error;
mod executor;
mod matrix;
pub mod ops;
mod relay;
mod vars;
mod workspace;

pub use bus::EventBus;
pub use contract::{check_contract, ContractError, ContractReport};
pub use error::RuntimeError;
pub use executor::{RunExecutor, RunReport};
pub use matrix::{load_items, merge_outputs, MatrixError, MatrixItem};
pub use ops::{
    init, CleanPredicate, DeletionReport, Engine, ExecutionPlan, LogFilter, PlanStep, Resource,
    RunOptions, RunSummary, STATE_DIR,
};
pub use relay::{parse_checkpoint, should_compact, Checkpoint, RelayDecision};
pub use workspace::{WorkspaceError, WorkspaceHandle, WorkspaceManager};
