// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process event bus.
//!
//! Ordered publish/subscribe for run and step lifecycle events, consumed by
//! the CLI renderer and the dashboard. The channel is bounded and lossy:
//! a subscriber that cannot keep up observes a lag error and misses events
//! rather than back-pressuring the executor.

use tokio::sync::broadcast;
use wave_core::StreamEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Multi-publisher multi-subscriber broadcast of [`StreamEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish without blocking. Having no subscribers is not an error.
    pub fn publish(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
