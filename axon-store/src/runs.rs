//! Run rows: creation, the status state machine, usage accumulators.

use crate::db::Store;
use crate::error::StoreError;
use axon_core::{OwnerId, RunId, RunPublicId, RunStatus, ThreadId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// A run row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    /// Internal row key.
    pub id: i64,
    /// Stable external UUID, as text.
    pub public_id: String,
    /// Owning account.
    pub owner_id: String,
    /// Conversation thread.
    pub thread_id: i64,
    /// Lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    /// Model name.
    pub model: String,
    /// Reasoning-effort hint, if any.
    pub reasoning_effort: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First transition to `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on entering a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Supervisor iterations consumed.
    pub iterations: i64,
    /// Accumulated prompt tokens.
    pub prompt_tokens: i64,
    /// Accumulated completion tokens.
    pub completion_tokens: i64,
    /// Accumulated cost, decimal as text.
    pub cost: String,
}

impl RunRow {
    /// Internal key as a typed id.
    pub fn run_id(&self) -> RunId {
        RunId::from(self.id)
    }

    /// Public id parsed from its text column.
    pub fn run_public_id(&self) -> Result<RunPublicId, StoreError> {
        self.public_id
            .parse()
            .map_err(|_| StoreError::NotFound(format!("bad public id {}", self.public_id)))
    }

    /// Accumulated cost as a decimal.
    pub fn cost_decimal(&self) -> Decimal {
        Decimal::from_str(&self.cost).unwrap_or(Decimal::ZERO)
    }
}

const RUN_COLUMNS: &str = "id, public_id, owner_id, thread_id, status, model, reasoning_effort, \
     created_at, started_at, finished_at, iterations, prompt_tokens, completion_tokens, cost";

impl Store {
    /// Create a run in status `queued` with a fresh public id.
    pub async fn create_run(
        &self,
        owner: &OwnerId,
        thread_id: ThreadId,
        model: &str,
        reasoning_effort: Option<&str>,
    ) -> Result<RunRow, StoreError> {
        let public_id = RunPublicId::generate();
        let sql = format!(
            "INSERT INTO runs (public_id, owner_id, thread_id, status, model, reasoning_effort, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(public_id.to_string())
            .bind(owner.as_str())
            .bind(thread_id.as_i64())
            .bind(RunStatus::Queued.as_str())
            .bind(model)
            .bind(reasoning_effort)
            .bind(Utc::now())
            .fetch_one(self.pool())
            .await?;
        Ok(row)
    }

    /// Fetch a run by public id.
    pub async fn get_run(&self, public_id: &RunPublicId) -> Result<RunRow, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE public_id = ?");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(public_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("run {public_id}")))
    }

    /// Fetch a run by public id, visible only to its owner.
    pub async fn get_run_scoped(
        &self,
        public_id: &RunPublicId,
        owner: &OwnerId,
    ) -> Result<RunRow, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE public_id = ? AND owner_id = ?");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(public_id.to_string())
            .bind(owner.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("run {public_id}")))
    }

    /// Fetch a run by internal key.
    pub async fn get_run_by_id(&self, run_id: RunId) -> Result<RunRow, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(run_id.as_i64())
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))
    }

    /// List the owner's runs, newest first.
    pub async fn list_runs(&self, owner: &OwnerId) -> Result<Vec<RunRow>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE owner_id = ? ORDER BY id DESC");
        Ok(sqlx::query_as(&sql)
            .bind(owner.as_str())
            .fetch_all(self.pool())
            .await?)
    }

    /// Guarded status transition. Fails with `InvalidTransition` if the
    /// run is not currently in `from` — the row moved first, and the
    /// caller must re-read.
    pub async fn transition_run(
        &self,
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition(format!(
                "run {run_id}: {from} -> {to} is not a legal transition"
            )));
        }
        let now = Utc::now();
        let result = if to == RunStatus::Running && from == RunStatus::Queued {
            sqlx::query(
                "UPDATE runs SET status = ?, started_at = ? WHERE id = ? AND status = ?",
            )
            .bind(to.as_str())
            .bind(now)
            .bind(run_id.as_i64())
            .bind(from.as_str())
            .execute(self.pool())
            .await?
        } else if to.is_terminal() {
            // finished_at is stamped exactly once
            sqlx::query(
                "UPDATE runs SET status = ?, finished_at = COALESCE(finished_at, ?)
                 WHERE id = ? AND status = ?",
            )
            .bind(to.as_str())
            .bind(now)
            .bind(run_id.as_i64())
            .bind(from.as_str())
            .execute(self.pool())
            .await?
        } else {
            sqlx::query("UPDATE runs SET status = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(run_id.as_i64())
                .bind(from.as_str())
                .execute(self.pool())
                .await?
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(format!(
                "run {run_id}: expected status {from}"
            )));
        }
        Ok(())
    }

    /// Terminal transition from whichever non-terminal status the run is
    /// in. Used by cancellation and supervisor-level failures.
    pub async fn finalize_run(&self, run_id: RunId, to: RunStatus) -> Result<(), StoreError> {
        debug_assert!(to.is_terminal());
        let result = sqlx::query(
            "UPDATE runs SET status = ?, finished_at = COALESCE(finished_at, ?)
             WHERE id = ? AND status IN ('queued', 'running', 'waiting')",
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(run_id.as_i64())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(format!(
                "run {run_id} is already terminal"
            )));
        }
        Ok(())
    }

    /// Accumulate one LLM call's usage onto the run.
    pub async fn add_run_usage(
        &self,
        run_id: RunId,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost: Decimal,
    ) -> Result<(), StoreError> {
        // Decimal arithmetic happens in the application; the column is
        // opaque text to the portable schema.
        let row: RunRow = {
            let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?");
            sqlx::query_as(&sql)
                .bind(run_id.as_i64())
                .fetch_one(self.pool())
                .await?
        };
        let total = row.cost_decimal() + cost;
        sqlx::query(
            "UPDATE runs SET prompt_tokens = prompt_tokens + ?,
                             completion_tokens = completion_tokens + ?,
                             cost = ?
             WHERE id = ?",
        )
        .bind(prompt_tokens as i64)
        .bind(completion_tokens as i64)
        .bind(total.to_string())
        .bind(run_id.as_i64())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Increment the supervisor iteration counter and return the new
    /// value.
    pub async fn bump_run_iterations(&self, run_id: RunId) -> Result<i64, StoreError> {
        let (iterations,): (i64,) = sqlx::query_as(
            "UPDATE runs SET iterations = iterations + 1 WHERE id = ? RETURNING iterations",
        )
        .bind(run_id.as_i64())
        .fetch_one(self.pool())
        .await?;
        Ok(iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture() -> (Store, RunRow) {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();
        let run = store
            .create_run(&owner, thread.id, "test-model", None)
            .await
            .unwrap();
        (store, run)
    }

    #[tokio::test]
    async fn new_run_is_queued_with_a_public_id() {
        let (_store, run) = fixture().await;
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.run_public_id().is_ok());
        assert!(run.finished_at.is_none());
    }

    #[tokio::test]
    async fn guarded_transition_rejects_wrong_source() {
        let (store, run) = fixture().await;
        let id = run.run_id();
        store
            .transition_run(id, RunStatus::Queued, RunStatus::Running)
            .await
            .unwrap();
        // second caller loses the guard
        assert!(matches!(
            store
                .transition_run(id, RunStatus::Queued, RunStatus::Running)
                .await,
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn finished_at_is_stamped_exactly_once() {
        let (store, run) = fixture().await;
        let id = run.run_id();
        store
            .transition_run(id, RunStatus::Queued, RunStatus::Running)
            .await
            .unwrap();
        store
            .transition_run(id, RunStatus::Running, RunStatus::Success)
            .await
            .unwrap();
        let row = store.get_run_by_id(id).await.unwrap();
        assert!(row.finished_at.is_some());
        // re-finalizing a terminal run is rejected
        assert!(store.finalize_run(id, RunStatus::Failed).await.is_err());
    }

    #[tokio::test]
    async fn usage_accumulates_across_calls() {
        let (store, run) = fixture().await;
        let id = run.run_id();
        store
            .add_run_usage(id, 100, 50, Decimal::new(5, 4))
            .await
            .unwrap();
        store
            .add_run_usage(id, 200, 25, Decimal::new(5, 4))
            .await
            .unwrap();
        let row = store.get_run_by_id(id).await.unwrap();
        assert_eq!(row.prompt_tokens, 300);
        assert_eq!(row.completion_tokens, 75);
        assert_eq!(row.cost_decimal(), Decimal::new(10, 4));
    }

    #[tokio::test]
    async fn owner_scoped_get_hides_foreign_runs() {
        let (store, run) = fixture().await;
        let public_id = run.run_public_id().unwrap();
        assert!(store
            .get_run_scoped(&public_id, &OwnerId::new("alice"))
            .await
            .is_ok());
        assert!(store
            .get_run_scoped(&public_id, &OwnerId::new("mallory"))
            .await
            .is_err());
    }
}
