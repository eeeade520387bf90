//! The orchestrator proper.

use async_trait::async_trait;
use axon_core::{
    EngineOutcome, ErrorKind, EventType, Interrupt, OwnerId, RunId, RunPublicId, RunStatus,
    WorkerResult,
};
use axon_engine::{EngineError, ReactEngine};
use axon_log::{EventLog, LogError};
use axon_store::{MemberReport, RunRow, Store, StoreError};
use axon_turn::provider::Provider;
use axon_worker::CompletionSink;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchConfig {
    /// Deadline applied to every barrier.
    pub barrier_deadline: Duration,
    /// Running jobs with a heartbeat older than this are reclaimed.
    pub job_stale_after: Duration,
    /// Claim attempts before a job fails with `retries_exhausted`.
    pub job_max_attempts: i32,
    /// Cadence of the barrier/reclaim sweepers.
    pub sweep_interval: Duration,
}

impl Default for OrchConfig {
    fn default() -> Self {
        Self {
            barrier_deadline: Duration::from_secs(600),
            job_stale_after: Duration::from_secs(120),
            job_max_attempts: 3,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Orchestration errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OrchError {
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Event append failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The run is not in a state that permits the requested operation.
    #[error("run {0} is not in a usable state: {1}")]
    BadState(RunPublicId, String),
}

/// Owns run lifecycles. One instance per process; shared behind `Arc`.
pub struct Orchestrator<P: Provider> {
    engine: ReactEngine<P>,
    store: Store,
    log: Arc<EventLog>,
    config: OrchConfig,
    cancellations: Mutex<HashMap<i64, CancellationToken>>,
}

impl<P: Provider + Send + Sync + 'static> Orchestrator<P> {
    /// Create an orchestrator.
    pub fn new(engine: ReactEngine<P>, store: Store, log: Arc<EventLog>, config: OrchConfig) -> Self {
        Self {
            engine,
            store,
            log,
            config,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Start a queued run: transition to `running`, append
    /// `supervisor_started`, and drive the engine until it completes or
    /// interrupts.
    pub async fn start_run(&self, public_id: &RunPublicId) -> Result<(), OrchError> {
        let run = self.store.get_run(public_id).await?;
        let run_id = run.run_id();
        self.store
            .transition_run(run_id, RunStatus::Queued, RunStatus::Running)
            .await?;
        self.log
            .append(
                run_id,
                public_id,
                EventType::SupervisorStarted,
                json!({
                    "model": run.model,
                    "thread_id": run.thread_id,
                }),
            )
            .await?;
        let run = self.store.get_run_by_id(run_id).await?;
        self.drive(run, None).await
    }

    /// Re-enter the engine with a released barrier's results. Called by
    /// exactly one path per barrier: whichever caller the store's
    /// single-resume step elected.
    pub async fn barrier_resume(
        &self,
        run_id: RunId,
        results: Vec<WorkerResult>,
    ) -> Result<(), OrchError> {
        let run = self.store.get_run_by_id(run_id).await?;
        let public_id = run.run_public_id()?;

        if let Some(barrier) = self.store.open_barrier_for_run(run_id).await? {
            self.store.complete_barrier(barrier.barrier_id()).await?;
        }
        if run.status.is_terminal() {
            // Cancelled (or failed) while workers were finishing; the
            // results have nowhere to go.
            return Ok(());
        }

        self.log
            .append(
                run_id,
                &public_id,
                EventType::SupervisorResumed,
                json!({ "worker_results": results.len() }),
            )
            .await?;
        self.store
            .transition_run(run_id, RunStatus::Waiting, RunStatus::Running)
            .await?;
        let run = self.store.get_run_by_id(run_id).await?;
        self.drive(run, Some(results)).await
    }

    /// Cancel a run on behalf of its owner: terminal status, barrier
    /// closed, live jobs cancelled, workers signalled.
    pub async fn cancel_run(
        &self,
        public_id: &RunPublicId,
        owner: &OwnerId,
    ) -> Result<(), OrchError> {
        let run = self.store.get_run_scoped(public_id, owner).await?;
        let run_id = run.run_id();
        if run.status.is_terminal() {
            return Ok(());
        }

        self.store.finalize_run(run_id, RunStatus::Cancelled).await?;
        self.store.cancel_barrier_for_run(run_id).await?;
        let live = self.store.cancel_jobs_for_run(run_id).await?;
        self.cancellation(run_id).cancel();
        self.log
            .append(
                run_id,
                public_id,
                EventType::SupervisorFailed,
                json!({
                    "error_kind": ErrorKind::Cancelled.as_str(),
                    "cancelled_jobs": live.len(),
                }),
            )
            .await?;
        self.forget_cancellation(run_id);
        Ok(())
    }

    /// One pass of the background sweepers: expire overdue barriers and
    /// reclaim stale jobs. The `axond` binary calls this on an interval;
    /// tests call it directly.
    pub async fn sweep(&self) -> Result<(), OrchError> {
        // Barrier deadlines. The store stamps stragglers `timeout` and
        // elects this sweep as the single resume caller.
        for (run_id, results) in self.store.expire_barriers(Utc::now()).await? {
            self.emit_timeout_events(run_id, &results).await?;
            if let Err(error) = self.barrier_resume(run_id, results).await {
                tracing::error!(%error, %run_id, "resume after barrier expiry failed");
            }
        }

        // Heartbeat reclaim. Jobs that ran out of attempts become
        // failed members, which may in turn release their barrier.
        let exhausted = self
            .store
            .reclaim_stale_jobs(self.config.job_stale_after, self.config.job_max_attempts)
            .await?;
        for job in exhausted {
            let run_id = job.run_id();
            if let Ok(run) = self.store.get_run_by_id(run_id).await {
                if let Ok(public_id) = run.run_public_id() {
                    let _ = self
                        .log
                        .append(
                            run_id,
                            &public_id,
                            EventType::WorkerFailed,
                            json!({
                                "job_id": job.id,
                                "worker_id": job.worker_id,
                                "error_kind": ErrorKind::RetriesExhausted.as_str(),
                                "error": "heartbeat lost after max attempts",
                            }),
                        )
                        .await;
                }
            }
            let report = MemberReport {
                job_id: job.job_id(),
                worker_id: job.worker_id.clone().map(axon_core::WorkerId::new),
                status: axon_core::BarrierJobStatus::Failed,
                result: None,
                error_kind: Some(ErrorKind::RetriesExhausted),
                error: Some("heartbeat lost after max attempts".into()),
            };
            match self.store.report_barrier_member(run_id, &report).await {
                Ok(Some(results)) => {
                    if let Err(error) = self.barrier_resume(run_id, results).await {
                        tracing::error!(%error, %run_id, "resume after reclaim failed");
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(%error, %run_id, "member report failed during reclaim");
                }
            }
        }
        Ok(())
    }

    /// Run the sweepers until the shutdown token fires.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
            }
            if let Err(error) = self.sweep().await {
                tracing::error!(%error, "sweep pass failed");
            }
        }
    }

    /// The cancellation token for a run, created on first use.
    pub fn cancellation(&self, run_id: RunId) -> CancellationToken {
        self.cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .entry(run_id.as_i64())
            .or_default()
            .clone()
    }

    fn forget_cancellation(&self, run_id: RunId) {
        self.cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .remove(&run_id.as_i64());
    }

    /// Drive one engine segment and handle its outcome.
    async fn drive(
        &self,
        run: RunRow,
        results: Option<Vec<WorkerResult>>,
    ) -> Result<(), OrchError> {
        let run_id = run.run_id();
        let public_id = run.run_public_id()?;
        let cancel = self.cancellation(run_id);

        match self.engine.run(&run, results, cancel).await {
            Ok(EngineOutcome::Completed { content }) => {
                self.log
                    .append(
                        run_id,
                        &public_id,
                        EventType::SupervisorComplete,
                        json!({ "content": content }),
                    )
                    .await?;
                self.store
                    .transition_run(run_id, RunStatus::Running, RunStatus::Success)
                    .await?;
                self.forget_cancellation(run_id);
                tracing::info!(%public_id, "run completed");
                Ok(())
            }
            Ok(EngineOutcome::Interrupted(Interrupt::WorkersPending { created_jobs })) => {
                // Events first: no job becomes claimable before its
                // spawn and the interrupt are in the log.
                for job in &created_jobs {
                    self.log
                        .append(
                            run_id,
                            &public_id,
                            EventType::WorkerSpawned,
                            json!({
                                "job_id": job.job_id.as_i64(),
                                "tool_call_id": job.tool_call_id.as_str(),
                                "task_preview": job.task_preview,
                            }),
                        )
                        .await?;
                }
                self.log
                    .append(
                        run_id,
                        &public_id,
                        EventType::SupervisorInterrupted,
                        json!({ "pending_workers": created_jobs.len() }),
                    )
                    .await?;

                let members: Vec<_> = created_jobs
                    .iter()
                    .map(|job| (job.job_id, job.tool_call_id.clone()))
                    .collect();
                let deadline = Utc::now()
                    + ChronoDuration::from_std(self.config.barrier_deadline)
                        .unwrap_or_else(|_| ChronoDuration::seconds(600));
                self.store
                    .install_barrier(run_id, &members, Some(deadline))
                    .await?;
                tracing::info!(%public_id, workers = members.len(), "run waiting on barrier");
                Ok(())
            }
            Err(EngineError::Cancelled) => {
                // cancel_run already finalized state and logged.
                Ok(())
            }
            Err(error) => {
                let kind = error.kind();
                self.log
                    .append(
                        run_id,
                        &public_id,
                        EventType::SupervisorFailed,
                        json!({
                            "error_kind": kind.as_str(),
                            "error": error.to_string(),
                        }),
                    )
                    .await?;
                self.store.finalize_run(run_id, RunStatus::Failed).await?;
                self.forget_cancellation(run_id);
                tracing::error!(%public_id, %error, "run failed");
                Ok(())
            }
        }
    }

    async fn emit_timeout_events(
        &self,
        run_id: RunId,
        results: &[WorkerResult],
    ) -> Result<(), OrchError> {
        let run = self.store.get_run_by_id(run_id).await?;
        let public_id = run.run_public_id()?;
        for result in results
            .iter()
            .filter(|r| r.status == axon_core::BarrierJobStatus::Timeout)
        {
            self.log
                .append(
                    run_id,
                    &public_id,
                    EventType::WorkerFailed,
                    json!({
                        "job_id": result.job_id.as_i64(),
                        "worker_id": result.worker_id.as_ref().map(|w| w.as_str()),
                        "tool_call_id": result.tool_call_id.as_str(),
                        "error_kind": ErrorKind::WorkerTimeout.as_str(),
                        "error": "worker deadline elapsed",
                    }),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: Provider + Send + Sync + 'static> CompletionSink for Arc<Orchestrator<P>> {
    /// File one member's terminal report; if the store elects this
    /// caller to resume, re-enter the engine on a fresh task so the
    /// reporting worker is released immediately.
    async fn worker_finished(&self, run_id: RunId, report: MemberReport) {
        match self.store.report_barrier_member(run_id, &report).await {
            Ok(Some(results)) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(error) = this.barrier_resume(run_id, results).await {
                        tracing::error!(%error, %run_id, "barrier resume failed");
                    }
                });
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(%error, %run_id, job_id = %report.job_id, "member report failed");
            }
        }
    }

    fn run_cancellation(&self, run_id: RunId) -> CancellationToken {
        self.cancellation(run_id)
    }
}
