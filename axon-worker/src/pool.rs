//! The bounded worker pool: claim, heartbeat, execute, report.

use crate::runtime::{WorkerReport, WorkerRuntime};
use async_trait::async_trait;
use axon_core::{BarrierJobStatus, EmitKind, ErrorKind, EventType, JobStatus, OwnerId, RunId, WorkerId};
use axon_log::{Emitter, EventLog};
use axon_store::barriers::MemberReport;
use axon_store::{JobRow, Store};
use axon_turn::provider::Provider;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Where the pool files each worker's terminal report, and where it
/// learns about run-level cancellation. The orchestrator implements
/// this; the pool never depends on orchestration directly.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// File a terminal report with the run's barrier.
    async fn worker_finished(&self, run_id: RunId, report: MemberReport);

    /// The cancellation token for a run. Workers observe it between
    /// iterations.
    fn run_cancellation(&self, run_id: RunId) -> CancellationToken;
}

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent workers per process.
    pub size: usize,
    /// Sleep between empty claim attempts.
    pub poll_interval: Duration,
    /// Job heartbeat cadence.
    pub heartbeat_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Claims queued jobs and drives them through the [`WorkerRuntime`],
/// with concurrency bounded by `config.size`.
pub struct WorkerPool<P: Provider> {
    runtime: Arc<WorkerRuntime<P>>,
    store: Store,
    log: Arc<EventLog>,
    sink: Arc<dyn CompletionSink>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl<P: Provider + 'static> WorkerPool<P> {
    /// Create a pool.
    pub fn new(
        runtime: Arc<WorkerRuntime<P>>,
        store: Store,
        log: Arc<EventLog>,
        sink: Arc<dyn CompletionSink>,
        config: PoolConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.size));
        Self {
            runtime,
            store,
            log,
            sink,
            config,
            semaphore,
            shutdown,
        }
    }

    /// Claim-and-dispatch loop. Runs until the shutdown token fires.
    pub async fn run(self: Arc<Self>) {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };

            match self.claim().await {
                Some(job) => {
                    let pool = self.clone();
                    tokio::spawn(async move {
                        pool.process(job).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        tracing::info!("worker pool stopped");
    }

    /// Claim and fully process at most one job. Returns whether a job
    /// was processed.
    pub async fn poll_once(&self) -> bool {
        match self.claim().await {
            Some(job) => {
                self.process(job).await;
                true
            }
            None => false,
        }
    }

    async fn claim(&self) -> Option<JobRow> {
        let worker_id = WorkerId::new(format!("w-{}", short_id()));
        match self.store.claim_job(&worker_id).await {
            Ok(job) => job,
            Err(error) => {
                tracing::error!(%error, "claim failed");
                None
            }
        }
    }

    async fn process(&self, job: JobRow) {
        let job_id = job.job_id();
        let run_id = job.run_id();
        let worker_id = WorkerId::new(
            job.worker_id
                .clone()
                .unwrap_or_else(|| format!("w-{}", short_id())),
        );

        let run = match self.store.get_run_by_id(run_id).await {
            Ok(run) => run,
            Err(error) => {
                tracing::error!(%error, %job_id, "job without a loadable run");
                let _ = self
                    .store
                    .fail_job(job_id, JobStatus::Failed, ErrorKind::Internal, &error.to_string())
                    .await;
                self.sink
                    .worker_finished(
                        run_id,
                        MemberReport {
                            job_id,
                            worker_id: Some(worker_id),
                            status: BarrierJobStatus::Failed,
                            result: None,
                            error_kind: Some(ErrorKind::Internal),
                            error: Some(error.to_string()),
                        },
                    )
                    .await;
                return;
            }
        };
        let Ok(public_id) = run.run_public_id() else {
            tracing::error!(%job_id, "run with unparseable public id");
            return;
        };

        if self
            .log
            .append(
                run_id,
                &public_id,
                EventType::WorkerStarted,
                json!({
                    "job_id": job.id,
                    "worker_id": worker_id.as_str(),
                    "mode": job.mode.as_str(),
                    "attempt": job.attempt,
                }),
            )
            .await
            .is_err()
        {
            // Do not run work the log cannot show.
            let _ = self
                .store
                .fail_job(job_id, JobStatus::Failed, ErrorKind::Internal, "event append failed")
                .await;
            return;
        }

        let cancel = self.sink.run_cancellation(run_id);
        let heartbeat = self.spawn_heartbeat(&run, &worker_id, job_id);
        let report = self.runtime.run_job(&run, &job, &worker_id, cancel).await;
        heartbeat.abort();

        self.settle(job_id, &report).await;
        self.sink
            .worker_finished(
                run_id,
                MemberReport {
                    job_id,
                    worker_id: Some(worker_id),
                    status: report.status,
                    result: report.result,
                    error_kind: report.error_kind,
                    error: report.error,
                },
            )
            .await;
    }

    async fn settle(&self, job_id: axon_core::JobId, report: &WorkerReport) {
        let result = match report.status {
            BarrierJobStatus::Completed => {
                self.store
                    .complete_job(job_id, report.result.as_deref().unwrap_or(""))
                    .await
            }
            BarrierJobStatus::Timeout => {
                self.store
                    .fail_job(
                        job_id,
                        JobStatus::Timeout,
                        report.error_kind.unwrap_or(ErrorKind::WorkerTimeout),
                        report.error.as_deref().unwrap_or("timeout"),
                    )
                    .await
            }
            _ => {
                self.store
                    .fail_job(
                        job_id,
                        JobStatus::Failed,
                        report.error_kind.unwrap_or(ErrorKind::Internal),
                        report.error.as_deref().unwrap_or("failed"),
                    )
                    .await
            }
        };
        if let Err(error) = result {
            // Cancellation may have already moved the row.
            tracing::warn!(%error, %job_id, "job settle skipped");
        }
    }

    fn spawn_heartbeat(
        &self,
        run: &axon_store::RunRow,
        worker_id: &WorkerId,
        job_id: axon_core::JobId,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.config.heartbeat_interval;
        let emitter = run.run_public_id().ok().map(|public_id| {
            Emitter::worker(
                self.log.clone(),
                run.run_id(),
                public_id,
                OwnerId::new(run.owner_id.clone()),
                worker_id.clone(),
                job_id,
            )
        });
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick is immediate
            loop {
                ticker.tick().await;
                if let Err(error) = store.heartbeat_job(job_id).await {
                    tracing::warn!(%error, %job_id, "heartbeat update failed");
                }
                if let Some(emitter) = &emitter {
                    let _ = emitter.emit(EmitKind::Heartbeat, json!({})).await;
                }
            }
        })
    }
}

fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_owned()
}
