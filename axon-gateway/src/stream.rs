//! Per-subscriber event queues with the documented overflow policy.
//!
//! Every subscription is bounded. Heartbeats coalesce — a newer one
//! replaces the queued one. Structural events are never dropped: if a
//! structural event would overflow the bound (or the underlying
//! broadcast channel lagged), the subscription terminates with a
//! `lagging_consumer` reason and the client recovers by reconnecting
//! with its last applied `event_id`.

use axon_core::{EventId, RunEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::sync::broadcast;

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The consumer fell behind a structural event; it must reconnect
    /// and replay.
    LaggingConsumer,
    /// The publisher went away.
    Closed,
}

/// One item handed to the SSE encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A run event to deliver.
    Event(RunEvent),
    /// Terminal marker; no further items follow.
    End(StreamEnd),
}

struct QueueState {
    items: VecDeque<RunEvent>,
    ended: Option<StreamEnd>,
}

/// A bounded per-subscriber queue fed by a pump task.
pub struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                ended: None,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Apply the overflow policy for one incoming event.
    fn push(&self, event: RunEvent) {
        let mut state = self.state.lock().expect("subscriber queue poisoned");
        if state.ended.is_some() {
            return;
        }
        if !event.event_type.is_structural() {
            // Coalesce: a newer heartbeat supersedes a queued one.
            if let Some(slot) = state
                .items
                .iter_mut()
                .find(|queued| queued.event_type == event.event_type)
            {
                *slot = event;
                drop(state);
                self.notify.notify_one();
                return;
            }
            if state.items.len() >= self.capacity {
                // A heartbeat may be dropped outright.
                return;
            }
        } else if state.items.len() >= self.capacity {
            // Never drop a structural event; fail the subscription.
            state.ended = Some(StreamEnd::LaggingConsumer);
            drop(state);
            self.notify.notify_one();
            return;
        }
        state.items.push_back(event);
        drop(state);
        self.notify.notify_one();
    }

    fn end(&self, end: StreamEnd) {
        let mut state = self.state.lock().expect("subscriber queue poisoned");
        if state.ended.is_none() {
            state.ended = Some(end);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Next item, waiting if the queue is momentarily empty. After an
    /// `End` is returned, the queue yields it forever.
    pub async fn pop(&self) -> StreamItem {
        loop {
            {
                let mut state = self.state.lock().expect("subscriber queue poisoned");
                if let Some(event) = state.items.pop_front() {
                    return StreamItem::Event(event);
                }
                if let Some(end) = state.ended {
                    return StreamItem::End(end);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Bridge a broadcast receiver into a bounded [`SubscriberQueue`],
/// skipping events at or below `already_seen` (delivered via replay).
pub fn pump(
    mut rx: broadcast::Receiver<RunEvent>,
    already_seen: EventId,
    capacity: usize,
) -> Arc<SubscriberQueue> {
    let queue = Arc::new(SubscriberQueue::new(capacity));
    let writer = queue.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.event_id > already_seen {
                        writer.push(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Structural events may be gone; force a replay.
                    writer.end(StreamEnd::LaggingConsumer);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    writer.end(StreamEnd::Closed);
                    break;
                }
            }
        }
    });
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::{EventType, RunPublicId};
    use chrono::Utc;
    use serde_json::json;

    fn event(id: i64, event_type: EventType) -> RunEvent {
        RunEvent {
            event_id: EventId::from(id),
            run_public_id: RunPublicId::generate(),
            event_type,
            timestamp: Utc::now(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn heartbeats_coalesce_under_pressure() {
        let queue = SubscriberQueue::new(4);
        queue.push(event(1, EventType::Heartbeat));
        queue.push(event(2, EventType::WorkerStarted));
        queue.push(event(3, EventType::Heartbeat)); // replaces event 1

        match queue.pop().await {
            StreamItem::Event(e) => assert_eq!(e.event_id.as_i64(), 3),
            other => panic!("expected coalesced heartbeat, got {other:?}"),
        }
        match queue.pop().await {
            StreamItem::Event(e) => assert_eq!(e.event_id.as_i64(), 2),
            other => panic!("expected structural event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn structural_overflow_terminates_the_subscription() {
        let queue = SubscriberQueue::new(2);
        queue.push(event(1, EventType::WorkerStarted));
        queue.push(event(2, EventType::WorkerComplete));
        queue.push(event(3, EventType::SupervisorResumed)); // overflow

        // queued events still drain, then the lagging marker surfaces
        assert!(matches!(queue.pop().await, StreamItem::Event(_)));
        assert!(matches!(queue.pop().await, StreamItem::Event(_)));
        assert_eq!(
            queue.pop().await,
            StreamItem::End(StreamEnd::LaggingConsumer)
        );
    }

    #[tokio::test]
    async fn heartbeat_overflow_drops_silently() {
        let queue = SubscriberQueue::new(1);
        queue.push(event(1, EventType::WorkerStarted));
        queue.push(event(2, EventType::Heartbeat)); // no heartbeat queued, full → dropped

        assert!(matches!(queue.pop().await, StreamItem::Event(_)));
        let mut state = queue.state.lock().unwrap();
        assert!(state.items.pop_front().is_none());
        assert!(state.ended.is_none());
    }

    #[tokio::test]
    async fn pump_skips_already_replayed_events() {
        let (tx, rx) = broadcast::channel(16);
        let queue = pump(rx, EventId::from(5), 16);
        tx.send(event(5, EventType::WorkerStarted)).unwrap();
        tx.send(event(6, EventType::WorkerComplete)).unwrap();
        drop(tx);

        match queue.pop().await {
            StreamItem::Event(e) => assert_eq!(e.event_id.as_i64(), 6),
            other => panic!("expected event 6, got {other:?}"),
        }
        assert_eq!(queue.pop().await, StreamItem::End(StreamEnd::Closed));
    }
}
