// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NDJSON stream-record parsing.
//!
//! Headless adapters emit one JSON record per stdout line. Records carry a
//! `type` (and optional `subtype`), possibly token usage, a tool call, or
//! text. Unknown record kinds and extra fields are tolerated; the stream
//! format belongs to the adapter, not to us.

use serde::Deserialize;

/// Token usage block inside a stream record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A tool invocation reported by the adapter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolUse {
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// One line of the adapter's stdout stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub tool_use: Option<ToolUse>,
    #[serde(default)]
    pub text: Option<String>,
}

impl StreamRecord {
    /// Parse a stdout line. Non-JSON lines and blank lines read as `None`;
    /// adapters occasionally interleave diagnostics with the stream.
    pub fn parse_line(line: &str) -> Option<StreamRecord> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// Tokens reported by this record.
    pub fn tokens(&self) -> u64 {
        self.usage.map(|u| u.total()).unwrap_or(0)
    }

    /// Whether this is the final result record of an invocation.
    pub fn is_result(&self) -> bool {
        self.kind == "result"
    }

    /// Error text carried by a failed result record.
    pub fn result_error(&self) -> Option<&str> {
        if !self.is_result() {
            return None;
        }
        if self.subtype.as_deref() == Some("error") {
            return Some(self.text.as_deref().unwrap_or("adapter reported an error"));
        }
        None
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
