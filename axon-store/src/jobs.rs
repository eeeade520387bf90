//! The durable worker job queue.
//!
//! Claim is one atomic statement: the oldest queued job (highest
//! priority first) flips to `running` with the claimant stamped, via
//! `UPDATE … RETURNING` on a LIMIT-1 subquery. Jobs in status `created`
//! are invisible to claim until the barrier install admits them.

use crate::db::Store;
use crate::error::StoreError;
use axon_core::{ErrorKind, ExecutionMode, JobId, JobStatus, RunId, WorkerId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// A worker job row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    /// Row key.
    pub id: i64,
    /// The run that spawned this job.
    pub run_id: i64,
    /// Task text handed to the worker.
    pub task: String,
    /// Queue status.
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    /// Execution mode.
    #[sqlx(try_from = "String")]
    pub mode: ExecutionMode,
    /// Repository URL, workspace mode only.
    pub git_repo: Option<String>,
    /// Base branch, workspace mode only.
    pub branch: Option<String>,
    /// Claim priority. Higher first; ties to the oldest.
    pub priority: i64,
    /// Claimant, once claimed.
    pub worker_id: Option<String>,
    /// Claim attempts so far.
    pub attempt: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First claim time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Liveness stamp while running.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Result text on completion.
    pub result: Option<String>,
    /// Error text on failure.
    pub error: Option<String>,
    /// Error classification on failure.
    pub error_kind: Option<String>,
}

impl JobRow {
    /// Row key as a typed id.
    pub fn job_id(&self) -> JobId {
        JobId::from(self.id)
    }

    /// The run this job belongs to.
    pub fn run_id(&self) -> RunId {
        RunId::from(self.run_id)
    }
}

/// Fields for phase-one job creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Task text.
    pub task: String,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Repository URL, workspace mode only.
    pub git_repo: Option<String>,
    /// Base branch, workspace mode only.
    pub branch: Option<String>,
    /// Claim priority.
    pub priority: i32,
}

pub(crate) const JOB_COLUMNS: &str =
    "id, run_id, task, status, mode, git_repo, branch, priority, worker_id, \
     attempt, created_at, started_at, finished_at, last_heartbeat, result, error, error_kind";

impl Store {
    /// Phase one of spawn: create the job in status `created`, invisible
    /// to claim queries until its barrier-job row exists.
    pub async fn create_job(&self, run_id: RunId, job: &NewJob) -> Result<JobRow, StoreError> {
        let sql = format!(
            "INSERT INTO worker_jobs (run_id, task, status, mode, git_repo, branch, priority, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {JOB_COLUMNS}"
        );
        Ok(sqlx::query_as(&sql)
            .bind(run_id.as_i64())
            .bind(&job.task)
            .bind(JobStatus::Created.as_str())
            .bind(job.mode.as_str())
            .bind(&job.git_repo)
            .bind(&job.branch)
            .bind(job.priority)
            .bind(Utc::now())
            .fetch_one(self.pool())
            .await?)
    }

    /// Atomically claim the best queued job for `worker_id`, or `None`
    /// when the queue is empty. Concurrent claimants never observe the
    /// same job.
    pub async fn claim_job(&self, worker_id: &WorkerId) -> Result<Option<JobRow>, StoreError> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE worker_jobs
             SET status = 'running', worker_id = ?, started_at = COALESCE(started_at, ?),
                 last_heartbeat = ?, attempt = attempt + 1
             WHERE id = (
                 SELECT id FROM worker_jobs
                 WHERE status = 'queued'
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        );
        Ok(sqlx::query_as(&sql)
            .bind(worker_id.as_str())
            .bind(now)
            .bind(now)
            .fetch_optional(self.pool())
            .await?)
    }

    /// Refresh a running job's liveness stamp.
    pub async fn heartbeat_job(&self, job_id: JobId) -> Result<(), StoreError> {
        sqlx::query("UPDATE worker_jobs SET last_heartbeat = ? WHERE id = ? AND status = 'running'")
            .bind(Utc::now())
            .bind(job_id.as_i64())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark a running job completed with its result text.
    pub async fn complete_job(&self, job_id: JobId, result: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE worker_jobs SET status = 'completed', result = ?, finished_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(result)
        .bind(Utc::now())
        .bind(job_id.as_i64())
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(format!(
                "job {job_id} is not running"
            )));
        }
        Ok(())
    }

    /// Mark a job failed (or timed out) with a classified error.
    pub async fn fail_job(
        &self,
        job_id: JobId,
        status: JobStatus,
        kind: ErrorKind,
        error: &str,
    ) -> Result<(), StoreError> {
        debug_assert!(matches!(status, JobStatus::Failed | JobStatus::Timeout));
        sqlx::query(
            "UPDATE worker_jobs SET status = ?, error = ?, error_kind = ?, finished_at = ?
             WHERE id = ? AND status IN ('created', 'queued', 'running')",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(kind.as_str())
        .bind(Utc::now())
        .bind(job_id.as_i64())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Sweep running jobs whose heartbeat is older than `stale_after`.
    /// Stale jobs under the attempt cap go back to `queued`; the rest
    /// fail with `retries_exhausted`. Returns the jobs that failed, so
    /// the caller can report them to their barriers.
    pub async fn reclaim_stale_jobs(
        &self,
        stale_after: std::time::Duration,
        max_attempts: i32,
    ) -> Result<Vec<JobRow>, StoreError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(stale_after)
                .unwrap_or_else(|_| ChronoDuration::seconds(120));

        let requeued = sqlx::query(
            "UPDATE worker_jobs
             SET status = 'queued', worker_id = NULL, last_heartbeat = NULL
             WHERE status = 'running' AND last_heartbeat < ? AND attempt < ?",
        )
        .bind(cutoff)
        .bind(max_attempts)
        .execute(self.pool())
        .await?;
        if requeued.rows_affected() > 0 {
            tracing::warn!(count = requeued.rows_affected(), "requeued stale jobs");
        }

        let sql = format!(
            "UPDATE worker_jobs
             SET status = 'failed', error = 'heartbeat lost after max attempts',
                 error_kind = 'retries_exhausted', finished_at = ?
             WHERE status = 'running' AND last_heartbeat < ? AND attempt >= ?
             RETURNING {JOB_COLUMNS}"
        );
        let exhausted: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(Utc::now())
            .bind(cutoff)
            .bind(max_attempts)
            .fetch_all(self.pool())
            .await?;
        Ok(exhausted)
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, job_id: JobId) -> Result<JobRow, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM worker_jobs WHERE id = ?");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.as_i64())
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))
    }

    /// All jobs of a run, oldest first.
    pub async fn jobs_for_run(&self, run_id: RunId) -> Result<Vec<JobRow>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM worker_jobs WHERE run_id = ? ORDER BY id ASC");
        Ok(sqlx::query_as(&sql)
            .bind(run_id.as_i64())
            .fetch_all(self.pool())
            .await?)
    }

    /// Count of jobs a run has ever spawned, for the per-run worker cap.
    pub async fn job_count_for_run(&self, run_id: RunId) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM worker_jobs WHERE run_id = ?")
                .bind(run_id.as_i64())
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// Mark every non-terminal job of a run cancelled. Returns the ids
    /// that were still live, so the pool can interrupt their workers.
    pub async fn cancel_jobs_for_run(&self, run_id: RunId) -> Result<Vec<JobId>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "UPDATE worker_jobs SET status = 'cancelled', error_kind = 'cancelled', finished_at = ?
             WHERE run_id = ? AND status IN ('created', 'queued', 'running')
             RETURNING id",
        )
        .bind(Utc::now())
        .bind(run_id.as_i64())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| JobId::from(id)).collect())
    }
}
