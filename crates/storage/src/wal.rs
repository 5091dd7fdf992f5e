// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL event write-ahead log with group commit support.
//!
//! Events are durably stored before any table mutation is visible to
//! observers, enabling crash recovery via snapshot + replay. Group commit
//! batches writes (~10ms) for performance.
//!
//! Each entry is a single line of JSON: `{"seq":N,"event":{...}}\n`.
//! The sequence number doubles as the monotonic event ID exposed to UIs.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;
use wave_core::Event;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialization helper for writing WAL entries without cloning the event.
#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    event: &'a Event,
}

/// Deserialization helper for reading WAL entries.
#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    event: Event,
}

/// A single WAL entry with sequence number
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// JSONL WAL for durable event storage with group commit.
///
/// Events are buffered in memory and flushed to disk either:
/// - When `needs_flush()` returns true (interval elapsed or buffer full)
/// - Explicitly via `flush()`
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Next sequence number to assign
    write_seq: u64,
    /// Buffered JSON lines waiting to be flushed (without trailing newline)
    write_buffer: Vec<Vec<u8>>,
    /// Last flush timestamp for interval checking
    last_flush: Instant,
}

impl Wal {
    /// Open or create a WAL at the given path.
    ///
    /// Scans existing entries to find the highest assigned sequence. A
    /// corrupt tail is rotated to `.bak` with the valid prefix preserved.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (mut write_seq, corrupt) = Self::scan_wal(&file)?;

        if corrupt {
            let valid_lines = Self::read_valid_lines(&file)?;
            drop(file);

            let bak_path = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "Corrupt WAL detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid_lines {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;

            write_seq = Self::scan_wal(&file)?.0;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
        })
    }

    /// Scan the WAL to find the maximum sequence number.
    ///
    /// Returns `(max_seq, corrupt)` where `corrupt` is true if a parse
    /// error was encountered (not just EOF).
    fn scan_wal(file: &File) -> Result<(u64, bool), WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_seq = 0u64;
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };

            max_seq = max_seq.max(record.seq);
        }

        Ok((max_seq, corrupt))
    }

    /// Read all valid (parseable) lines, stopping at the first corrupt entry.
    fn read_valid_lines(file: &File) -> Result<Vec<String>, WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid_lines = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let _: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => break,
            };

            valid_lines.push(trimmed.to_string());
        }

        Ok(valid_lines)
    }

    /// Append an event to the write buffer.
    ///
    /// Returns the assigned sequence number. The event is NOT durable until
    /// `flush()` is called.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        let record = WalRecordRef { seq, event };
        let json_bytes = serde_json::to_vec(&record)?;
        self.write_buffer.push(json_bytes);
        Ok(seq)
    }

    /// Check if flush is needed (interval elapsed or buffer full).
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Flush all buffered entries to disk with a single fsync.
    ///
    /// This is the durability point - after flush returns successfully,
    /// all buffered events are guaranteed to be on disk.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        for mut json_bytes in self.write_buffer.drain(..) {
            json_bytes.push(b'\n');
            self.file.write_all(&json_bytes)?;
        }

        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Get the current write sequence number.
    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Iterate over all entries after the given sequence number.
    ///
    /// Used for recovery (replaying from snapshot) and event queries.
    /// Pending buffered writes are flushed first so the scan sees them.
    pub fn entries_after(&mut self, seq: u64) -> Result<Vec<WalEntry>, WalError> {
        self.flush()?;
        read_entries_after(&self.file, seq)
    }

    /// Truncate entries at or before the given sequence number.
    ///
    /// Called after a snapshot is durable to reclaim disk space. Creates a
    /// new WAL file with only entries > seq, via atomic rename.
    pub fn truncate_through(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;

        let kept = read_entries_after(&self.file, seq)?;
        let tmp_path = self.path.with_extension("tmp");

        {
            let mut tmp_file = File::create(&tmp_path)?;
            for entry in &kept {
                let record = WalRecordRef {
                    seq: entry.seq,
                    event: &entry.event,
                };
                let mut json_bytes = serde_json::to_vec(&record)?;
                json_bytes.push(b'\n');
                tmp_file.write_all(&json_bytes)?;
            }
            tmp_file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        Ok(())
    }
}

/// Scan a WAL file for entries with seq > the given watermark.
///
/// Shared by the actor (via [`Wal::entries_after`]) and read-only observers
/// that open the file with their own handle.
pub(crate) fn read_entries_after(file: &File, seq: u64) -> Result<Vec<WalEntry>, WalError> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut entries = Vec::new();
    let mut line = String::new();
    let mut current_offset = 0u64;

    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            current_offset += bytes_read as u64;
            continue;
        }

        let record: WalRecord = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    offset = current_offset,
                    error = %e,
                    "Corrupt WAL entry during replay, stopping at corruption point",
                );
                break;
            }
        };

        current_offset += bytes_read as u64;

        if record.seq > seq {
            entries.push(WalEntry {
                seq: record.seq,
                event: record.event,
            });
        }
    }

    Ok(entries)
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
