// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier types and run-ID generation.
//!
//! Wave IDs are opaque strings: run IDs are generated (UUIDs in production),
//! step IDs come from pipeline declarations, and matrix children derive
//! theirs from the parent. Every ID type borrows as `&str` so the store can
//! resolve user-supplied unique prefixes the way git resolves short hashes.

use crate::run::RunId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Define a newtype ID wrapper around `String`.
///
/// Generated IDs order and hash exactly like their string form, so they can
/// key the store's tables and be looked up by `&str` prefix.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Generates run identifiers.
///
/// Injectable so tests can pin predictable run IDs while production gets
/// collision-free ones.
pub trait IdGen: Clone + Send + Sync {
    fn next_run_id(&self) -> RunId;
}

/// UUID v4 run IDs for production use
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next_run_id(&self) -> RunId {
        RunId::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Sequential run IDs for testing
#[derive(Clone)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("run")
    }
}

impl IdGen for SequentialIdGen {
    fn next_run_id(&self) -> RunId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        RunId::new(format!("{}-{}", self.prefix, n))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
