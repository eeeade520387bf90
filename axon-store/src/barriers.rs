//! Worker barriers: two-phase install and the atomic single-resume step.
//!
//! Install runs in one transaction that creates the barrier row and its
//! member rows, flips the phase-one jobs from `created` to `queued`, and
//! moves the run to `waiting`. No job is ever claimable before its
//! barrier-job row exists, which closes the fast-worker race.
//!
//! Completion runs in one transaction that updates the member row and
//! increments the barrier counter. Only the caller whose increment
//! reaches `expected_count` flips the barrier to `resuming` and gets
//! the full result set back. Every other caller gets `None`.

use crate::db::Store;
use crate::error::StoreError;
use crate::jobs::JobRow;
use axon_core::{
    BarrierId, BarrierJobStatus, BarrierStatus, ErrorKind, JobId, RunId, ToolCallId, WorkerId,
    WorkerResult,
};
use chrono::{DateTime, Utc};

/// A barrier row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BarrierRow {
    /// Row key.
    pub id: i64,
    /// The run this barrier gates.
    pub run_id: i64,
    /// Number of workers the barrier waits for.
    pub expected_count: i64,
    /// Workers accounted for so far.
    pub completed_count: i64,
    /// Barrier status.
    #[sqlx(try_from = "String")]
    pub status: BarrierStatus,
    /// Optional deadline; unfinished members time out past it.
    pub deadline: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl BarrierRow {
    /// Row key as a typed id.
    pub fn barrier_id(&self) -> BarrierId {
        BarrierId::from(self.id)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BarrierJobRow {
    job_id: i64,
    tool_call_id: String,
    #[sqlx(try_from = "String")]
    status: BarrierJobStatus,
    worker_id: Option<String>,
    result: Option<String>,
    error: Option<String>,
    error_kind: Option<String>,
}

impl BarrierJobRow {
    fn into_result(self) -> WorkerResult {
        WorkerResult {
            tool_call_id: ToolCallId::new(self.tool_call_id),
            job_id: JobId::from(self.job_id),
            worker_id: self.worker_id.map(WorkerId::new),
            status: self.status,
            result: self.result,
            error_kind: self
                .error_kind
                .and_then(|k| serde_json::from_value(serde_json::Value::String(k)).ok()),
            error: self.error,
        }
    }
}

/// The terminal report a worker (or sweeper) files for one barrier
/// member.
#[derive(Debug, Clone)]
pub struct MemberReport {
    /// The job being reported.
    pub job_id: JobId,
    /// The reporting worker, when one claimed the job.
    pub worker_id: Option<WorkerId>,
    /// Terminal member status.
    pub status: BarrierJobStatus,
    /// Result text on completion.
    pub result: Option<String>,
    /// Error classification on failure.
    pub error_kind: Option<ErrorKind>,
    /// Error text on failure.
    pub error: Option<String>,
}

impl Store {
    /// Phase two of spawn: install the barrier over jobs created in
    /// phase one. One transaction: barrier row, member rows, jobs
    /// `created` → `queued`, run `running` → `waiting`.
    pub async fn install_barrier(
        &self,
        run_id: RunId,
        members: &[(JobId, ToolCallId)],
        deadline: Option<DateTime<Utc>>,
    ) -> Result<BarrierId, StoreError> {
        if members.is_empty() {
            return Err(StoreError::Conflict("barrier with no members".into()));
        }

        let mut tx = self.pool().begin().await?;

        // At most one non-terminal barrier per run.
        let (open,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM worker_barriers WHERE run_id = ? AND status != 'completed'",
        )
        .bind(run_id.as_i64())
        .fetch_one(&mut *tx)
        .await?;
        if open > 0 {
            return Err(StoreError::Conflict(format!(
                "run {run_id} already has an open barrier"
            )));
        }

        let (barrier_id,): (i64,) = sqlx::query_as(
            "INSERT INTO worker_barriers (run_id, expected_count, status, deadline, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(run_id.as_i64())
        .bind(members.len() as i64)
        .bind(BarrierStatus::Waiting.as_str())
        .bind(deadline)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        for (job_id, tool_call_id) in members {
            sqlx::query(
                "INSERT INTO barrier_jobs (barrier_id, job_id, tool_call_id, status)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(barrier_id)
            .bind(job_id.as_i64())
            .bind(tool_call_id.as_str())
            .bind(BarrierJobStatus::Queued.as_str())
            .execute(&mut *tx)
            .await?;

            let admitted =
                sqlx::query("UPDATE worker_jobs SET status = 'queued' WHERE id = ? AND status = 'created'")
                    .bind(job_id.as_i64())
                    .execute(&mut *tx)
                    .await?;
            if admitted.rows_affected() != 1 {
                return Err(StoreError::Conflict(format!(
                    "job {job_id} is not in status created"
                )));
            }
        }

        let waiting =
            sqlx::query("UPDATE runs SET status = 'waiting' WHERE id = ? AND status = 'running'")
                .bind(run_id.as_i64())
                .execute(&mut *tx)
                .await?;
        if waiting.rows_affected() != 1 {
            return Err(StoreError::InvalidTransition(format!(
                "run {run_id} is not running"
            )));
        }

        tx.commit().await?;
        tracing::debug!(%run_id, barrier_id, members = members.len(), "barrier installed");
        Ok(BarrierId::from(barrier_id))
    }

    /// File a terminal report for one member and perform the atomic
    /// single-resume step.
    ///
    /// Returns `Some(results)` for exactly one caller per barrier: the
    /// one whose report makes `completed_count` reach `expected_count`
    /// (or the deadline sweeper). Everyone else, including duplicate
    /// reports for an already-finished member, gets `None`.
    pub async fn report_barrier_member(
        &self,
        run_id: RunId,
        report: &MemberReport,
    ) -> Result<Option<Vec<WorkerResult>>, StoreError> {
        debug_assert!(report.status.is_finished());

        let mut tx = self.pool().begin().await?;

        let barrier: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM worker_barriers WHERE run_id = ? AND status = 'waiting'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(run_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((barrier_id,)) = barrier else {
            // Barrier already resuming/completed: a late or duplicate
            // report. Nothing to do.
            return Ok(None);
        };

        let updated = sqlx::query(
            "UPDATE barrier_jobs
             SET status = ?, worker_id = ?, result = ?, error = ?, error_kind = ?, completed_at = ?
             WHERE barrier_id = ? AND job_id = ? AND status = 'queued'",
        )
        .bind(report.status.as_str())
        .bind(report.worker_id.as_ref().map(|w| w.as_str()))
        .bind(&report.result)
        .bind(&report.error)
        .bind(report.error_kind.map(|k| k.as_str()))
        .bind(Utc::now())
        .bind(barrier_id)
        .bind(report.job_id.as_i64())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            // Member already finished (duplicate report) or not part of
            // this barrier.
            return Ok(None);
        }

        let (completed, expected): (i64, i64) = sqlx::query_as(
            "UPDATE worker_barriers SET completed_count = completed_count + 1
             WHERE id = ? AND status = 'waiting'
             RETURNING completed_count, expected_count",
        )
        .bind(barrier_id)
        .fetch_one(&mut *tx)
        .await?;

        if completed < expected {
            tx.commit().await?;
            return Ok(None);
        }

        let resumed = sqlx::query(
            "UPDATE worker_barriers SET status = 'resuming' WHERE id = ? AND status = 'waiting'",
        )
        .bind(barrier_id)
        .execute(&mut *tx)
        .await?;
        if resumed.rows_affected() == 0 {
            // Another caller flipped first; they own the resume.
            tx.commit().await?;
            return Ok(None);
        }

        let results = Self::load_member_results(&mut tx, barrier_id).await?;
        tx.commit().await?;
        tracing::info!(%run_id, barrier_id, members = results.len(), "barrier resuming");
        Ok(Some(results))
    }

    /// Sweep barriers whose deadline has elapsed. Unfinished members are
    /// stamped `timeout` with a synthetic error (their jobs too), the
    /// barrier flips to `resuming`, and the full result set is returned
    /// exactly as a worker-driven resume would.
    pub async fn expire_barriers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(RunId, Vec<WorkerResult>)>, StoreError> {
        let expired: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, run_id FROM worker_barriers
             WHERE status = 'waiting' AND deadline IS NOT NULL AND deadline < ?",
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        let mut resumes = Vec::new();
        for (barrier_id, run_id) in expired {
            let mut tx = self.pool().begin().await?;

            let flipped = sqlx::query(
                "UPDATE worker_barriers SET status = 'resuming' WHERE id = ? AND status = 'waiting'",
            )
            .bind(barrier_id)
            .execute(&mut *tx)
            .await?;
            if flipped.rows_affected() == 0 {
                // A completion raced the sweep and owns the resume.
                continue;
            }

            let stranded: Vec<(i64,)> = sqlx::query_as(
                "UPDATE barrier_jobs
                 SET status = 'timeout', error = 'worker deadline elapsed',
                     error_kind = 'worker_timeout', completed_at = ?
                 WHERE barrier_id = ? AND status = 'queued'
                 RETURNING job_id",
            )
            .bind(now)
            .bind(barrier_id)
            .fetch_all(&mut *tx)
            .await?;
            for (job_id,) in &stranded {
                sqlx::query(
                    "UPDATE worker_jobs
                     SET status = 'timeout', error = 'worker deadline elapsed',
                         error_kind = 'worker_timeout', finished_at = ?
                     WHERE id = ? AND status IN ('queued', 'running')",
                )
                .bind(now)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }

            let results = Self::load_member_results(&mut tx, barrier_id).await?;
            tx.commit().await?;
            tracing::warn!(
                run_id,
                barrier_id,
                timed_out = stranded.len(),
                "barrier deadline elapsed"
            );
            resumes.push((RunId::from(run_id), results));
        }
        Ok(resumes)
    }

    /// Mark a barrier completed once its resume was handed to the
    /// orchestrator.
    pub async fn complete_barrier(&self, barrier_id: BarrierId) -> Result<(), StoreError> {
        sqlx::query("UPDATE worker_barriers SET status = 'completed' WHERE id = ?")
            .bind(barrier_id.as_i64())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// The run's open barrier, if any.
    pub async fn open_barrier_for_run(
        &self,
        run_id: RunId,
    ) -> Result<Option<BarrierRow>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT id, run_id, expected_count, completed_count, status, deadline, created_at
             FROM worker_barriers
             WHERE run_id = ? AND status != 'completed'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(run_id.as_i64())
        .fetch_optional(self.pool())
        .await?)
    }

    /// Flip any open barrier of a cancelled run straight to `completed`.
    pub async fn cancel_barrier_for_run(&self, run_id: RunId) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE worker_barriers SET status = 'completed'
             WHERE run_id = ? AND status != 'completed'",
        )
        .bind(run_id.as_i64())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The job rows currently claimable or running for a barrier's run:
    /// the live worker map a snapshot reports.
    pub async fn live_jobs_for_run(&self, run_id: RunId) -> Result<Vec<JobRow>, StoreError> {
        let sql = format!(
            "SELECT {cols} FROM worker_jobs
             WHERE run_id = ? AND status IN ('queued', 'running')
             ORDER BY id ASC",
            cols = crate::jobs::JOB_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(run_id.as_i64())
            .fetch_all(self.pool())
            .await?)
    }

    /// How many barrier members have ever been installed for this
    /// tool-call id on this run. This is the spawn retry counter.
    pub async fn spawn_attempts_for_tool_call(
        &self,
        run_id: RunId,
        tool_call_id: &ToolCallId,
    ) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM barrier_jobs bj
             JOIN worker_barriers wb ON wb.id = bj.barrier_id
             WHERE wb.run_id = ? AND bj.tool_call_id = ?",
        )
        .bind(run_id.as_i64())
        .bind(tool_call_id.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    async fn load_member_results(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        barrier_id: i64,
    ) -> Result<Vec<WorkerResult>, StoreError> {
        let rows: Vec<BarrierJobRow> = sqlx::query_as(
            "SELECT job_id, tool_call_id, status, worker_id, result, error, error_kind
             FROM barrier_jobs WHERE barrier_id = ? ORDER BY job_id ASC",
        )
        .bind(barrier_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(BarrierJobRow::into_result).collect())
    }
}
