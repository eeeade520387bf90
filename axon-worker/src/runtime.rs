//! The per-job worker runtime: standard and workspace execution.

use crate::workspace;
use axon_core::{BarrierJobStatus, EmitKind, ErrorKind, OwnerId, WorkerId};
use axon_artifact::ArtifactStore;
use axon_log::{Emitter, EventLog};
use axon_store::{JobRow, RunRow, Store};
use axon_tool::{ToolContext, ToolInvoker, ToolRegistry};
use axon_turn::provider::Provider;
use axon_turn::types::{AssistantMessage, ProviderMessage, ProviderRequest, ToolSchema};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Worker system prompt. Narrower than the supervisor's: a worker owns
/// exactly one task and reports one result.
const WORKER_PREAMBLE: &str = "\
You are a background worker executing a single delegated task. Use the \
available tools as needed, then reply with a final plain-text result \
that fully answers the task. You cannot delegate further; finish the \
task yourself or report precisely why you could not.";

/// Characters of a result surfaced in terminal events and replies.
const RESULT_PREVIEW_CHARS: usize = 240;

/// Static configuration for worker execution.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Standard-mode ReAct iteration bound.
    pub max_iterations: u32,
    /// Max output tokens per model call.
    pub max_tokens: u32,
    /// LLM transport attempts (1 initial + retries).
    pub llm_retry_attempts: u32,
    /// Base backoff between transport retries; doubles per attempt.
    pub llm_retry_base_ms: u64,
    /// Whole-subprocess timeout for workspace mode.
    pub workspace_timeout: Duration,
    /// Directory workspace clones land under.
    pub workroot: PathBuf,
    /// External coding-agent argv prefix; the task is appended as the
    /// final argument.
    pub agent_command: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_tokens: 4096,
            llm_retry_attempts: 3,
            llm_retry_base_ms: 250,
            workspace_timeout: Duration::from_secs(900),
            workroot: PathBuf::from("./data/workspaces"),
            agent_command: vec!["codex-agent".into()],
        }
    }
}

/// Internal plumbing failures while driving a job. These never escape
/// [`WorkerRuntime::run_job`]; they fold into a failed report.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Subprocess orchestration failed.
    #[error("subprocess error: {0}")]
    Subprocess(String),

    /// Artifact I/O failed.
    #[error(transparent)]
    Artifact(#[from] axon_artifact::ArtifactError),

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] axon_store::StoreError),
}

/// A worker's terminal outcome, before it is filed with the barrier.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    /// Terminal member status.
    pub status: BarrierJobStatus,
    /// Result text on success.
    pub result: Option<String>,
    /// Classification on failure.
    pub error_kind: Option<ErrorKind>,
    /// Detail on failure.
    pub error: Option<String>,
}

impl WorkerReport {
    fn success(result: String) -> Self {
        Self {
            status: BarrierJobStatus::Completed,
            result: Some(result),
            error_kind: None,
            error: None,
        }
    }

    fn failure(status: BarrierJobStatus, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            status,
            result: None,
            error_kind: Some(kind),
            error: Some(error.into()),
        }
    }
}

/// Runs one claimed job to completion.
pub struct WorkerRuntime<P: Provider> {
    provider: Arc<P>,
    registry: Arc<ToolRegistry>,
    invoker: Arc<ToolInvoker>,
    store: Store,
    log: Arc<EventLog>,
    artifacts: ArtifactStore,
    config: WorkerConfig,
}

impl<P: Provider> WorkerRuntime<P> {
    /// Create a runtime. The registry is the worker allowlist — it must
    /// not contain the spawn tool.
    pub fn new(
        provider: Arc<P>,
        registry: Arc<ToolRegistry>,
        invoker: Arc<ToolInvoker>,
        store: Store,
        log: Arc<EventLog>,
        artifacts: ArtifactStore,
        config: WorkerConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            invoker,
            store,
            log,
            artifacts,
            config,
        }
    }

    /// Drive one job to a terminal report. Emits the terminal
    /// `worker_complete`/`worker_failed` event; plumbing failures fold
    /// into a failed report rather than escaping.
    pub async fn run_job(
        &self,
        run: &RunRow,
        job: &JobRow,
        worker_id: &WorkerId,
        cancel: CancellationToken,
    ) -> WorkerReport {
        let Ok(public_id) = run.run_public_id() else {
            return WorkerReport::failure(
                BarrierJobStatus::Failed,
                ErrorKind::Internal,
                "run has an unparseable public id",
            );
        };
        let emitter = Emitter::worker(
            self.log.clone(),
            run.run_id(),
            public_id,
            OwnerId::new(run.owner_id.clone()),
            worker_id.clone(),
            job.job_id(),
        );

        let report = match job.mode {
            axon_core::ExecutionMode::Standard => {
                self.run_standard(run, job, worker_id, &emitter, cancel).await
            }
            axon_core::ExecutionMode::Workspace => {
                self.run_workspace(run, job, worker_id, cancel).await
            }
        };

        let terminal = match report.status {
            BarrierJobStatus::Completed => emitter
                .emit(
                    EmitKind::Complete,
                    json!({
                        "result_preview": preview(report.result.as_deref().unwrap_or("")),
                    }),
                )
                .await,
            _ => emitter
                .emit(
                    EmitKind::Failed,
                    json!({
                        "error_kind": report.error_kind.unwrap_or(ErrorKind::Internal).as_str(),
                        "error": report.error.as_deref().unwrap_or("unknown"),
                    }),
                )
                .await,
        };
        if let Err(error) = terminal {
            tracing::error!(%error, job_id = job.id, "terminal worker event failed to append");
        }
        report
    }

    // ── standard mode ──────────────────────────────────────────────

    async fn run_standard(
        &self,
        run: &RunRow,
        job: &JobRow,
        worker_id: &WorkerId,
        emitter: &Emitter,
        cancel: CancellationToken,
    ) -> WorkerReport {
        let actor = worker_id.to_string();
        let tool_ctx = ToolContext {
            owner_id: OwnerId::new(run.owner_id.clone()),
            store: self.store.clone(),
            cancel: cancel.clone(),
        };

        if let Err(error) = self
            .artifacts
            .put_json(
                &actor,
                "metadata.json",
                &json!({
                    "job_id": job.id,
                    "worker_id": actor,
                    "task": job.task,
                    "mode": job.mode.as_str(),
                    "model": run.model,
                    "started_at": Utc::now(),
                }),
            )
            .await
        {
            return WorkerReport::failure(
                BarrierJobStatus::Failed,
                ErrorKind::Internal,
                format!("metadata write failed: {error}"),
            );
        }

        let mut messages = vec![
            ProviderMessage::system(WORKER_PREAMBLE),
            ProviderMessage::user(job.task.clone()),
        ];
        self.journal(&actor, &messages[1]).await;
        let tools = self.tool_schemas();

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return WorkerReport::failure(
                    BarrierJobStatus::Failed,
                    ErrorKind::Cancelled,
                    "run cancelled",
                );
            }

            let started = std::time::Instant::now();
            let request = ProviderRequest {
                model: run.model.clone(),
                reasoning_effort: run.reasoning_effort.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: Some(self.config.max_tokens),
            };
            let response = match self.call_with_retry(request).await {
                Ok(response) => response,
                Err(report) => return report,
            };
            let _ = self
                .artifacts
                .append_jsonl(
                    &actor,
                    "metrics.jsonl",
                    &json!({
                        "iteration": iteration,
                        "duration_ms": started.elapsed().as_millis() as u64,
                        "prompt_tokens": response.usage.prompt_tokens,
                        "completion_tokens": response.usage.completion_tokens,
                    }),
                )
                .await;

            let assistant = ProviderMessage {
                role: axon_core::ChatRole::Assistant,
                content: response.content.clone(),
                tool_calls: if response.tool_calls.is_empty() {
                    None
                } else {
                    Some(response.tool_calls.clone())
                },
                tool_call_id: None,
            };
            self.journal(&actor, &assistant).await;
            messages.push(assistant);

            if response.is_final() {
                if let Err(error) = self
                    .artifacts
                    .put(&actor, "result.txt", response.content.as_bytes())
                    .await
                {
                    tracing::warn!(%error, "result artifact write failed");
                }
                return WorkerReport::success(response.content);
            }

            let results = self
                .invoker
                .invoke_many(&response.tool_calls, emitter, &tool_ctx)
                .await;
            for result in results {
                let reply = ProviderMessage::tool_reply(result.tool_call_id, result.content);
                self.journal(&actor, &reply).await;
                messages.push(reply);
            }
        }

        WorkerReport::failure(
            BarrierJobStatus::Failed,
            ErrorKind::IterationLimit,
            format!(
                "worker exhausted {} iterations without a final answer",
                self.config.max_iterations
            ),
        )
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .registry
            .iter()
            .map(|tool| ToolSchema {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                input_schema: tool.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    async fn journal(&self, actor: &str, message: &ProviderMessage) {
        if let Err(error) = self.artifacts.append_jsonl(actor, "thread.jsonl", message).await {
            tracing::warn!(%error, "thread journal write failed");
        }
    }

    async fn call_with_retry(
        &self,
        request: ProviderRequest,
    ) -> Result<AssistantMessage, WorkerReport> {
        let attempts = self.config.llm_retry_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.llm_retry_base_ms);
        for attempt in 1..=attempts {
            match self.provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_transient() && attempt < attempts => {
                    tracing::warn!(%error, attempt, "transient llm failure in worker, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(error) => {
                    return Err(WorkerReport::failure(
                        BarrierJobStatus::Failed,
                        error.classify(),
                        error.to_string(),
                    ));
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    // ── workspace mode ─────────────────────────────────────────────

    async fn run_workspace(
        &self,
        run: &RunRow,
        job: &JobRow,
        worker_id: &WorkerId,
        cancel: CancellationToken,
    ) -> WorkerReport {
        let actor = worker_id.to_string();

        let Some(repo) = job.git_repo.as_deref() else {
            return WorkerReport::failure(
                BarrierJobStatus::Failed,
                ErrorKind::InvalidInput,
                "workspace job without git_repo",
            );
        };
        if let Err(error) = workspace::validate_repo_url(repo) {
            return WorkerReport::failure(BarrierJobStatus::Failed, ErrorKind::InvalidInput, error.to_string());
        }
        if let Some(base) = job.branch.as_deref() {
            if let Err(error) = workspace::validate_branch(base) {
                return WorkerReport::failure(
                    BarrierJobStatus::Failed,
                    ErrorKind::InvalidInput,
                    error.to_string(),
                );
            }
        }
        let handle = run.public_id.replace('-', "");
        let branch = match workspace::work_branch(&handle) {
            Ok(branch) => branch,
            Err(error) => {
                return WorkerReport::failure(
                    BarrierJobStatus::Failed,
                    ErrorKind::InvalidInput,
                    error.to_string(),
                );
            }
        };

        match self
            .drive_workspace(job, &actor, repo, job.branch.as_deref(), &branch, cancel)
            .await
        {
            Ok(report) => report,
            Err(error) => WorkerReport::failure(
                BarrierJobStatus::Failed,
                ErrorKind::WorkerCrashed,
                error.to_string(),
            ),
        }
    }

    async fn drive_workspace(
        &self,
        job: &JobRow,
        actor: &str,
        repo: &str,
        base_branch: Option<&str>,
        work_branch: &str,
        cancel: CancellationToken,
    ) -> Result<WorkerReport, WorkerError> {
        let checkout = self.config.workroot.join(actor).join("repo");
        if let Some(parent) = checkout.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::Subprocess(e.to_string()))?;
        }

        let mut clone = Command::new("git");
        clone.arg("clone").arg("--depth").arg("1");
        if let Some(base) = base_branch {
            clone.arg("--branch").arg(base);
        }
        // `--` stops anything url-shaped from being parsed as a flag.
        clone.arg("--").arg(repo).arg(&checkout);
        run_checked(clone, Duration::from_secs(120)).await?;

        let mut branch = Command::new("git");
        branch.arg("-C").arg(&checkout).arg("checkout").arg("-b").arg(work_branch);
        run_checked(branch, Duration::from_secs(30)).await?;

        self.artifacts
            .put_json(
                actor,
                "metadata.json",
                &json!({
                    "job_id": job.id,
                    "worker_id": actor,
                    "task": job.task,
                    "mode": "workspace",
                    "git_repo": repo,
                    "branch": work_branch,
                    "started_at": Utc::now(),
                }),
            )
            .await?;

        let Some((program, args)) = self.config.agent_command.split_first() else {
            return Err(WorkerError::Subprocess("no agent command configured".into()));
        };
        let mut agent = Command::new(program);
        agent
            .args(args)
            .arg(&job.task)
            .current_dir(&checkout)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        agent.process_group(0);

        let child = agent
            .spawn()
            .map_err(|e| WorkerError::Subprocess(format!("agent spawn failed: {e}")))?;
        #[cfg(unix)]
        let group = child.id();
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            output = &mut wait => {
                output.map_err(|e| WorkerError::Subprocess(e.to_string()))?
            }
            _ = tokio::time::sleep(self.config.workspace_timeout) => {
                #[cfg(unix)]
                kill_process_group(group);
                return Ok(WorkerReport::failure(
                    BarrierJobStatus::Timeout,
                    ErrorKind::WorkerTimeout,
                    format!("agent exceeded {}s", self.config.workspace_timeout.as_secs()),
                ));
            }
            _ = cancel.cancelled() => {
                #[cfg(unix)]
                kill_process_group(group);
                return Ok(WorkerReport::failure(
                    BarrierJobStatus::Failed,
                    ErrorKind::Cancelled,
                    "run cancelled",
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        self.artifacts.put(actor, "result.txt", stdout.as_bytes()).await?;

        let mut diff = Command::new("git");
        diff.arg("-C").arg(&checkout).arg("diff");
        if let Ok(patch) = run_capture(diff, Duration::from_secs(60)).await {
            self.artifacts.put(actor, "diff.patch", patch.as_bytes()).await?;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(WorkerReport::failure(
                BarrierJobStatus::Failed,
                ErrorKind::WorkerCrashed,
                format!("agent exited with {}: {}", output.status, preview(&stderr)),
            ));
        }
        Ok(WorkerReport::success(preview(&stdout)))
    }
}

/// Kill an entire process group. Workspace agents run detached in their
/// own group precisely so expiry can take the whole tree down.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child is the group leader (process_group(0) at spawn).
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

async fn run_checked(command: Command, timeout: Duration) -> Result<(), WorkerError> {
    let output = run_output(command, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkerError::Subprocess(format!(
            "command failed with {}: {}",
            output.status,
            preview(&stderr)
        )));
    }
    Ok(())
}

async fn run_capture(command: Command, timeout: Duration) -> Result<String, WorkerError> {
    let output = run_output(command, timeout).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_output(
    mut command: Command,
    timeout: Duration,
) -> Result<std::process::Output, WorkerError> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let result = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| WorkerError::Subprocess(format!("timed out after {}s", timeout.as_secs())))?;
    result.map_err(|e| WorkerError::Subprocess(e.to_string()))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= RESULT_PREVIEW_CHARS {
        return text.trim_end().to_owned();
    }
    let cut: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    format!("{cut}…")
}
