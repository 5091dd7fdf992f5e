// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use wave_core::{RunId, StepId, StreamState};

fn event(id: u64) -> StreamEvent {
    StreamEvent::heartbeat(
        RunId::new("run-1"),
        StepId::new(format!("s{id}")),
        StreamState::StepProgress,
        1_000_000,
    )
}

#[tokio::test]
async fn subscribers_receive_published_events() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();

    bus.publish(event(1));
    bus.publish(event(2));

    assert_eq!(rx.recv().await.unwrap().step_id.unwrap(), "s1");
    assert_eq!(rx.recv().await.unwrap().step_id.unwrap(), "s2");
}

#[tokio::test]
async fn publish_without_subscribers_is_fine() {
    let bus = EventBus::default();
    bus.publish(event(1));
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn subscribers_only_see_events_after_subscription() {
    let bus = EventBus::default();
    bus.publish(event(1));
    let mut rx = bus.subscribe();
    bus.publish(event(2));

    assert_eq!(rx.recv().await.unwrap().step_id.unwrap(), "s2");
}

#[tokio::test]
async fn slow_subscribers_lag_instead_of_blocking() {
    let bus = EventBus::new(4);
    let mut rx = bus.subscribe();

    for i in 0..20 {
        bus.publish(event(i));
    }

    // The lossy channel reports the lag, then resumes from what's retained
    match rx.recv().await {
        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
            assert!(missed > 0);
        }
        other => panic!("expected lag, got {:?}", other),
    }
    assert!(rx.recv().await.is_ok());
}

#[tokio::test]
async fn multiple_subscribers_each_get_events() {
    let bus = EventBus::default();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.publish(event(7));

    assert!(a.recv().await.is_ok());
    assert!(b.recv().await.is_ok());
}
