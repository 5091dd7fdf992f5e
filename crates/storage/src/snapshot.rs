// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! Snapshots store the complete materialized state at a point in time,
//! identified by the WAL sequence number, zstd-compressed with a sha256
//! checksum. Recovery loads the snapshot and replays WAL entries after
//! that sequence. The invariant: a snapshot must be durable (including
//! directory fsync) before the WAL is truncated.

use crate::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Current snapshot schema version.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// zstd compression level for snapshots (speed over ratio)
const COMPRESSION_LEVEL: i32 = 3;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot schema version ("v" to match the migration registry)
    pub v: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    /// The complete materialized state
    pub state: MaterializedState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
    /// sha256 of the serialized state, for corruption detection
    #[serde(default)]
    pub checksum: String,
}

impl Snapshot {
    /// Create a new snapshot at the current schema version.
    pub fn new(seq: u64, state: MaterializedState) -> Result<Self, SnapshotError> {
        let checksum = state_checksum(&state)?;
        Ok(Self {
            v: CURRENT_SNAPSHOT_VERSION,
            seq,
            state,
            created_at: Utc::now(),
            checksum,
        })
    }

    /// Save the snapshot atomically (write compressed to .tmp, rename,
    /// fsync the directory so the rename is durable).
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| SnapshotError::Compress(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;

        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }

        Ok(())
    }

    /// Load a snapshot if it exists.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, is corrupt, or fails
    /// its checksum. Corrupt snapshots are moved to a `.bak` file so the
    /// caller can recover via WAL replay.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(path)?;
        let parsed: Result<Snapshot, String> = zstd::decode_all(compressed.as_slice())
            .map_err(|e| e.to_string())
            .and_then(|json| serde_json::from_slice(&json).map_err(|e| e.to_string()));

        match parsed {
            Ok(snapshot) => {
                if !snapshot.checksum.is_empty() {
                    let actual = state_checksum(&snapshot.state)?;
                    if actual != snapshot.checksum {
                        return rotate_corrupt(path, "checksum mismatch");
                    }
                }
                Ok(Some(snapshot))
            }
            Err(e) => rotate_corrupt(path, &e),
        }
    }
}

impl Snapshot {
    /// Load without side effects, for read-only observers.
    ///
    /// Missing, corrupt, or checksum-failing snapshots all read as `None`;
    /// nothing is rotated or rewritten.
    pub fn load_readonly(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }
        let compressed = fs::read(path)?;
        let Ok(json) = zstd::decode_all(compressed.as_slice()) else {
            return Ok(None);
        };
        let Ok(snapshot) = serde_json::from_slice::<Snapshot>(&json) else {
            return Ok(None);
        };
        if !snapshot.checksum.is_empty() && state_checksum(&snapshot.state)? != snapshot.checksum {
            return Ok(None);
        }
        Ok(Some(snapshot))
    }
}

fn rotate_corrupt(path: &Path, reason: &str) -> Result<Option<Snapshot>, SnapshotError> {
    let bak_path = rotate_bak_path(path);
    warn!(
        reason,
        path = %path.display(),
        bak = %bak_path.display(),
        "Corrupt snapshot, moving to .bak and starting fresh",
    );
    fs::rename(path, &bak_path)?;
    Ok(None)
}

/// sha256 over the canonical JSON serialization of the state tables.
pub(crate) fn state_checksum(state: &MaterializedState) -> Result<String, SnapshotError> {
    let json = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
