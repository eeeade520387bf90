//! The append-only per-run event log.

use crate::db::Store;
use crate::error::StoreError;
use axon_core::{EventId, EventType, RunEvent, RunId, RunPublicId};
use chrono::{DateTime, Utc};

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: i64,
    run_public_id: String,
    event_type: String,
    timestamp: DateTime<Utc>,
    payload: String,
}

impl EventRow {
    fn into_event(self) -> Result<RunEvent, StoreError> {
        let event_type = EventType::try_from(self.event_type.clone())
            .map_err(|e| StoreError::Conflict(e))?;
        Ok(RunEvent {
            event_id: EventId::from(self.event_id),
            run_public_id: self
                .run_public_id
                .parse()
                .map_err(|_| StoreError::NotFound(format!("bad public id {}", self.run_public_id)))?,
            event_type,
            timestamp: self.timestamp,
            payload: serde_json::from_str(&self.payload)?,
        })
    }
}

impl Store {
    /// Append an event to a run's timeline and return it with its
    /// assigned `event_id`.
    ///
    /// One transaction: bump the run's high-water mark (the run row is
    /// the per-run append lock), then insert the event at that sequence
    /// number. A failure here must be treated by the caller as failure
    /// of the logical action — visible state never diverges from the
    /// log.
    pub async fn append_event(
        &self,
        run_id: RunId,
        run_public_id: &RunPublicId,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<RunEvent, StoreError> {
        let timestamp = Utc::now();
        let payload_text = serde_json::to_string(payload)?;

        let mut tx = self.pool().begin().await?;
        let (event_id,): (i64,) = sqlx::query_as(
            "UPDATE runs SET last_event_id = last_event_id + 1
             WHERE id = ? RETURNING last_event_id",
        )
        .bind(run_id.as_i64())
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO run_events (run_id, event_id, run_public_id, event_type, timestamp, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id.as_i64())
        .bind(event_id)
        .bind(run_public_id.to_string())
        .bind(event_type.as_str())
        .bind(timestamp)
        .bind(&payload_text)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(RunEvent {
            event_id: EventId::from(event_id),
            run_public_id: *run_public_id,
            event_type,
            timestamp,
            payload: payload.clone(),
        })
    }

    /// Events with `event_id > since`, in order. `since = 0` replays the
    /// full timeline.
    pub async fn events_since(
        &self,
        run_public_id: &RunPublicId,
        since: EventId,
    ) -> Result<Vec<RunEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT event_id, run_public_id, event_type, timestamp, payload
             FROM run_events
             WHERE run_public_id = ? AND event_id > ?
             ORDER BY event_id ASC",
        )
        .bind(run_public_id.to_string())
        .bind(since.as_i64())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// The run's current high-water mark.
    pub async fn last_event_id(&self, run_public_id: &RunPublicId) -> Result<EventId, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_event_id FROM runs WHERE public_id = ?")
                .bind(run_public_id.to_string())
                .fetch_optional(self.pool())
                .await?;
        row.map(|(id,)| EventId::from(id))
            .ok_or_else(|| StoreError::NotFound(format!("run {run_public_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::{OwnerId, RunStatus};
    use serde_json::json;

    async fn fixture() -> (Store, RunId, RunPublicId) {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();
        let run = store
            .create_run(&owner, thread.id, "test-model", None)
            .await
            .unwrap();
        let public_id = run.run_public_id().unwrap();
        (store, run.run_id(), public_id)
    }

    #[tokio::test]
    async fn event_ids_are_strictly_increasing() {
        let (store, run_id, public_id) = fixture().await;
        let mut previous = 0;
        let mut previous_ts = None;
        for _ in 0..5 {
            let event = store
                .append_event(run_id, &public_id, EventType::Heartbeat, &json!({}))
                .await
                .unwrap();
            assert!(event.event_id.as_i64() > previous);
            if let Some(ts) = previous_ts {
                assert!(event.timestamp >= ts);
            }
            previous = event.event_id.as_i64();
            previous_ts = Some(event.timestamp);
        }
    }

    #[tokio::test]
    async fn replay_from_cutoff_returns_exactly_the_gap() {
        let (store, run_id, public_id) = fixture().await;
        for i in 0..10 {
            store
                .append_event(
                    run_id,
                    &public_id,
                    EventType::SupervisorIteration,
                    &json!({"iteration": i}),
                )
                .await
                .unwrap();
        }
        let gap = store
            .events_since(&public_id, EventId::from(4))
            .await
            .unwrap();
        assert_eq!(gap.len(), 6);
        assert_eq!(gap.first().unwrap().event_id.as_i64(), 5);
        assert_eq!(gap.last().unwrap().event_id.as_i64(), 10);
    }

    #[tokio::test]
    async fn replay_is_idempotent_against_full_stream() {
        let (store, run_id, public_id) = fixture().await;
        for _ in 0..6 {
            store
                .append_event(run_id, &public_id, EventType::Heartbeat, &json!({}))
                .await
                .unwrap();
        }
        let full = store
            .events_since(&public_id, EventId::from(0))
            .await
            .unwrap();
        let tail = store
            .events_since(&public_id, EventId::from(3))
            .await
            .unwrap();
        // applying head + tail idempotently equals applying full
        let mut seen: Vec<i64> = full.iter().take(3).map(|e| e.event_id.as_i64()).collect();
        for event in &tail {
            if !seen.contains(&event.event_id.as_i64()) {
                seen.push(event.event_id.as_i64());
            }
        }
        assert_eq!(
            seen,
            full.iter().map(|e| e.event_id.as_i64()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn events_are_scoped_to_their_run() {
        let (store, run_id, public_id) = fixture().await;
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();
        let other = store
            .create_run(&owner, thread.id, "test-model", None)
            .await
            .unwrap();
        let other_public = other.run_public_id().unwrap();

        store
            .append_event(run_id, &public_id, EventType::SupervisorStarted, &json!({}))
            .await
            .unwrap();
        store
            .append_event(
                other.run_id(),
                &other_public,
                EventType::SupervisorStarted,
                &json!({}),
            )
            .await
            .unwrap();

        let events = store
            .events_since(&public_id, EventId::from(0))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_public_id, public_id);
        assert_eq!(
            store.get_run_by_id(run_id).await.unwrap().status,
            RunStatus::Queued
        );
    }
}
