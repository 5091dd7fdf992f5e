// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor and observer handles over the state database.
//!
//! [`StateStore`] is the single read-write handle: the executor owns it for
//! the lifetime of a run and every mutation flows through [`StateStore::append`].
//! [`StateReader`] is the read-only handle used by status, logs, and the
//! dashboard; it opens its own file descriptors and never blocks the writer.
//!
//! Credential scrubbing happens here, at the persistence boundary: message
//! and error fields are redacted before serialization.

use crate::migration::{MigrationError, MigrationRecord, MigrationRegistry};
use crate::snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
use crate::state::MaterializedState;
use crate::wal::{read_entries_after, Wal, WalError};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use wave_core::{scrub, Event, StreamEvent};

const WAL_FILE: &str = "events.wal";
const SNAPSHOT_FILE: &str = "snapshot.zst";
const MIGRATIONS_FILE: &str = "migrations.json";

/// Env var disabling automatic snapshot migration on open.
pub const NO_MIGRATE_ENV: &str = "WAVE_NO_MIGRATE";

/// Errors from state store operations
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no pre-migration snapshot for rollback to v{0}")]
    Rollback(u32),
    #[error(
        "snapshot is at schema v{found} but migration is disabled ({env} is set)",
        env = NO_MIGRATE_ENV
    )]
    MigrationDisabled { found: u32 },
}

/// Read-write handle: owns the WAL append path and the authoritative
/// in-memory tables.
pub struct StateStore {
    dir: PathBuf,
    wal: Wal,
    state: MaterializedState,
}

impl StateStore {
    /// Open (or create) the store, migrating the snapshot if needed and
    /// replaying the WAL tail.
    pub fn open(dir: &Path) -> Result<Self, StateStoreError> {
        std::fs::create_dir_all(dir)?;

        let snapshot = load_and_migrate_snapshot(dir)?;
        let (mut state, snapshot_seq) = match snapshot {
            Some(s) => (s.state, s.seq),
            None => (MaterializedState::default(), 0),
        };

        let mut wal = Wal::open(&dir.join(WAL_FILE))?;
        for entry in wal.entries_after(snapshot_seq)? {
            state.apply_event(&entry.event);
        }

        Ok(Self {
            dir: dir.to_owned(),
            wal,
            state,
        })
    }

    /// Append an event: scrub, log, apply to the tables.
    ///
    /// Returns the assigned event ID and the published form (if the event
    /// has one). The table mutation and the event entry are one WAL record,
    /// so they commit atomically.
    pub fn append(&mut self, event: Event) -> Result<(u64, Option<StreamEvent>), StateStoreError> {
        let event = scrub_event(event);
        let seq = self.wal.append(&event)?;
        self.state.apply_event(&event);
        if self.wal.needs_flush() {
            self.wal.flush()?;
        }
        Ok((seq, event.to_stream_event(seq)))
    }

    /// Append with one retry on a transient IO failure.
    ///
    /// A second failure is fatal to the caller; state already written
    /// stays on disk.
    pub fn append_with_retry(
        &mut self,
        event: Event,
    ) -> Result<(u64, Option<StreamEvent>), StateStoreError> {
        match self.append(event.clone()) {
            Ok(result) => Ok(result),
            Err(first) => {
                warn!(error = %first, "state store append failed, retrying once");
                self.append(event)
            }
        }
    }

    /// Force pending WAL entries to disk.
    pub fn flush(&mut self) -> Result<(), StateStoreError> {
        self.wal.flush()?;
        Ok(())
    }

    /// Snapshot the tables and truncate the WAL through the snapshot seq.
    pub fn checkpoint(&mut self) -> Result<(), StateStoreError> {
        self.wal.flush()?;
        let seq = self.wal.write_seq();
        let snapshot = Snapshot::new(seq, self.state.clone())?;
        snapshot.save(&self.dir.join(SNAPSHOT_FILE))?;
        self.wal.truncate_through(seq)?;
        info!(seq, "state checkpoint written");
        Ok(())
    }

    /// The authoritative tables.
    pub fn state(&self) -> &MaterializedState {
        &self.state
    }

    /// Published events still present in the WAL, optionally filtered by run.
    pub fn events(&mut self, run_id: Option<&str>) -> Result<Vec<StreamEvent>, StateStoreError> {
        let entries = self.wal.entries_after(0)?;
        Ok(collect_stream_events(entries, run_id))
    }

    /// Restore the pre-migration snapshot rotated out when the store was
    /// upgraded past `version`.
    pub fn rollback_to(dir: &Path, version: u32) -> Result<(), StateStoreError> {
        let bak = dir.join(format!("snapshot.v{}.bak", version));
        if !bak.exists() {
            return Err(StateStoreError::Rollback(version));
        }
        std::fs::rename(&bak, dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }

    /// Migration records applied to this store.
    pub fn migration_records(&self) -> Result<Vec<MigrationRecord>, StateStoreError> {
        read_migration_records(&self.dir)
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        // State must be durable before exit; resume depends on it.
        if let Err(e) = self.wal.flush() {
            warn!(error = %e, "failed to flush WAL on drop");
        }
    }
}

/// Read-only handle for observers. Opens its own descriptors; never writes.
pub struct StateReader {
    dir: PathBuf,
    state: MaterializedState,
    last_seq: u64,
}

impl StateReader {
    /// Open the store read-only. A missing or corrupt snapshot degrades to
    /// WAL-only replay; nothing is rotated or rewritten.
    pub fn open(dir: &Path) -> Result<Self, StateStoreError> {
        let mut reader = Self {
            dir: dir.to_owned(),
            state: MaterializedState::default(),
            last_seq: 0,
        };

        if let Some(snapshot) = Snapshot::load_readonly(&dir.join(SNAPSHOT_FILE))? {
            reader.last_seq = snapshot.seq;
            reader.state = snapshot.state;
        }
        reader.refresh()?;
        Ok(reader)
    }

    /// Pick up WAL entries appended since the last refresh.
    pub fn refresh(&mut self) -> Result<(), StateStoreError> {
        let wal_path = self.dir.join(WAL_FILE);
        if !wal_path.exists() {
            return Ok(());
        }
        let file = File::open(&wal_path)?;
        for entry in read_entries_after(&file, self.last_seq)? {
            self.state.apply_event(&entry.event);
            self.last_seq = entry.seq;
        }
        Ok(())
    }

    pub fn state(&self) -> &MaterializedState {
        &self.state
    }

    /// Published events still present in the WAL, optionally filtered by run.
    pub fn events(&self, run_id: Option<&str>) -> Result<Vec<StreamEvent>, StateStoreError> {
        let wal_path = self.dir.join(WAL_FILE);
        if !wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&wal_path)?;
        let entries = read_entries_after(&file, 0)?;
        Ok(collect_stream_events(entries, run_id))
    }
}

fn collect_stream_events(
    entries: Vec<crate::wal::WalEntry>,
    run_id: Option<&str>,
) -> Vec<StreamEvent> {
    entries
        .into_iter()
        .filter(|e| run_id.is_none_or(|r| e.event.run_id() == r))
        .filter_map(|e| e.event.to_stream_event(e.seq))
        .collect()
}

/// Load the snapshot, applying registered migrations unless disabled.
fn load_and_migrate_snapshot(dir: &Path) -> Result<Option<Snapshot>, StateStoreError> {
    let path = dir.join(SNAPSHOT_FILE);
    let Some(snapshot) = Snapshot::load(&path)? else {
        return Ok(None);
    };

    if snapshot.v == CURRENT_SNAPSHOT_VERSION {
        return Ok(Some(snapshot));
    }

    if std::env::var_os(NO_MIGRATE_ENV).is_some() {
        return Err(StateStoreError::MigrationDisabled { found: snapshot.v });
    }

    // Keep the pre-migration snapshot for rollback
    let from_version = snapshot.v;
    std::fs::copy(&path, dir.join(format!("snapshot.v{}.bak", from_version)))?;

    let registry = MigrationRegistry::new();
    let value = serde_json::to_value(&snapshot)?;
    let (migrated, applied) = registry.migrate_to(value, CURRENT_SNAPSHOT_VERSION)?;
    let migrated: Snapshot = serde_json::from_value(migrated)?;
    // Rebuild so the checksum covers the migrated tables
    let snapshot = Snapshot::new(migrated.seq, migrated.state)?;

    if !applied.is_empty() {
        info!(
            from = from_version,
            to = CURRENT_SNAPSHOT_VERSION,
            steps = applied.len(),
            "migrated state snapshot"
        );
        append_migration_records(dir, &applied)?;
        snapshot.save(&path)?;
    }

    Ok(Some(snapshot))
}

fn read_migration_records(dir: &Path) -> Result<Vec<MigrationRecord>, StateStoreError> {
    let path = dir.join(MIGRATIONS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

fn append_migration_records(dir: &Path, records: &[MigrationRecord]) -> Result<(), StateStoreError> {
    let mut all = read_migration_records(dir)?;
    all.extend_from_slice(records);
    std::fs::write(dir.join(MIGRATIONS_FILE), serde_json::to_vec_pretty(&all)?)?;
    Ok(())
}

/// Redact credential values from the human-readable fields of an event.
fn scrub_event(event: Event) -> Event {
    match event {
        Event::StepTransition {
            run_id,
            step_id,
            state,
            persona,
            message,
            tokens_used,
            duration_ms,
            exit_code,
            error,
            epoch_ms,
        } => Event::StepTransition {
            run_id,
            step_id,
            state,
            persona,
            message: scrub(&message),
            tokens_used,
            duration_ms,
            exit_code,
            error: error.map(|e| scrub(&e)),
            epoch_ms,
        },
        Event::RunFinished {
            run_id,
            status,
            error,
            epoch_ms,
        } => Event::RunFinished {
            run_id,
            status,
            error: error.map(|e| scrub(&e)),
            epoch_ms,
        },
        Event::Note {
            run_id,
            step_id,
            severity,
            message,
            epoch_ms,
        } => Event::Note {
            run_id,
            step_id,
            severity,
            message: scrub(&message),
            epoch_ms,
        },
        other => other,
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
