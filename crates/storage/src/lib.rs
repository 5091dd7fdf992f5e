// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for Wave.
//!
//! One logical database per project at `.wave/state.db/`: an append-only
//! JSONL WAL (`events.wal`) plus a zstd-compressed snapshot of the
//! materialized tables. Recovery is snapshot + WAL replay.

mod migration;
mod snapshot;
mod state;
mod store;
mod wal;

pub use migration::{Migration, MigrationError, MigrationRecord, MigrationRegistry};
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::{CancellationRecord, MaterializedState};
pub use store::{StateReader, StateStore, StateStoreError};
pub use wal::{Wal, WalEntry, WalError};
