//! Event log: transactional append plus per-run live publication.

use axon_core::{EventId, EventType, RunEvent, RunId, RunPublicId};
use axon_store::{Store, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each run's in-process broadcast channel. Subscribers that
/// fall further behind than this recover via replay, so the value only
/// bounds memory, not correctness.
const CHANNEL_CAPACITY: usize = 512;

/// Errors from event log operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LogError {
    /// The payload is not a JSON object (or a typed payload failed to
    /// serialize into one).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The underlying store failed. The caller must treat the logical
    /// action as failed — visible state never diverges from the log.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The per-run append-only timeline plus its live publication.
///
/// Cloneable; all clones share the store pool and the channel registry.
#[derive(Clone)]
pub struct EventLog {
    store: Store,
    channels: std::sync::Arc<Mutex<HashMap<RunPublicId, broadcast::Sender<RunEvent>>>>,
}

impl EventLog {
    /// Create an event log over the given store.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            channels: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Append an event and publish it to live subscribers.
    ///
    /// The payload must be a JSON object; timestamps inside it must
    /// already be strings (serde does this for chrono types — raw
    /// non-JSON values cannot occur by construction, non-objects are
    /// rejected here).
    pub async fn append(
        &self,
        run_id: RunId,
        run_public_id: &RunPublicId,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<RunEvent, LogError> {
        if !payload.is_object() {
            return Err(LogError::InvalidPayload(format!(
                "{event_type} payload must be a JSON object"
            )));
        }
        let event = self
            .store
            .append_event(run_id, run_public_id, event_type, &payload)
            .await?;
        self.publish(&event);
        Ok(event)
    }

    /// Subscribe to a run's live publication. Pair with
    /// [`EventLog::replay`] for the replay-then-live protocol; the
    /// receiver only sees events appended after this call.
    pub fn subscribe(&self, run_public_id: &RunPublicId) -> broadcast::Receiver<RunEvent> {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        channels
            .entry(*run_public_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Stored events with `event_id > since`, in order.
    pub async fn replay(
        &self,
        run_public_id: &RunPublicId,
        since: EventId,
    ) -> Result<Vec<RunEvent>, LogError> {
        Ok(self.store.events_since(run_public_id, since).await?)
    }

    /// The run's current high-water mark.
    pub async fn last_event_id(&self, run_public_id: &RunPublicId) -> Result<EventId, LogError> {
        Ok(self.store.last_event_id(run_public_id).await?)
    }

    fn publish(&self, event: &RunEvent) {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        if let Some(sender) = channels.get(&event.run_public_id) {
            if sender.send(event.clone()).is_err() {
                // No live receivers; drop the channel until the next
                // subscriber shows up.
                tracing::trace!(run = %event.run_public_id, "dropping idle event channel");
                channels.remove(&event.run_public_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::OwnerId;
    use serde_json::json;

    async fn fixture() -> (EventLog, RunId, RunPublicId) {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();
        let run = store
            .create_run(&owner, thread.id, "test-model", None)
            .await
            .unwrap();
        let public_id = run.run_public_id().unwrap();
        let run_id = run.run_id();
        (EventLog::new(store), run_id, public_id)
    }

    #[tokio::test]
    async fn append_rejects_non_object_payloads() {
        let (log, run_id, public_id) = fixture().await;
        let err = log
            .append(run_id, &public_id, EventType::Heartbeat, json!("not an object"))
            .await;
        assert!(matches!(err, Err(LogError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn live_subscribers_see_appends_in_order() {
        let (log, run_id, public_id) = fixture().await;
        let mut rx = log.subscribe(&public_id);

        for i in 0..3 {
            log.append(
                run_id,
                &public_id,
                EventType::SupervisorIteration,
                json!({"iteration": i}),
            )
            .await
            .unwrap();
        }

        for expected in 1..=3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event_id.as_i64(), expected);
        }
    }

    #[tokio::test]
    async fn replay_then_live_covers_the_gap() {
        let (log, run_id, public_id) = fixture().await;
        for _ in 0..4 {
            log.append(run_id, &public_id, EventType::Heartbeat, json!({}))
                .await
                .unwrap();
        }

        // subscriber missed the first four
        let mut rx = log.subscribe(&public_id);
        let replayed = log.replay(&public_id, EventId::from(0)).await.unwrap();
        assert_eq!(replayed.len(), 4);

        log.append(run_id, &public_id, EventType::SupervisorComplete, json!({}))
            .await
            .unwrap();
        let live = rx.recv().await.unwrap();
        assert_eq!(live.event_id.as_i64(), 5);
        assert!(replayed.iter().all(|e| e.event_id < live.event_id));
    }
}
