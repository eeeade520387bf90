//! The engine proper: iterate, call the model, dispatch tools, persist,
//! and interrupt on spawn.

use crate::prompt;
use axon_core::{
    CoreConfig, CreatedJob, EngineOutcome, ErrorKind, EventType, ExecutionMode, Interrupt,
    NewMessage, RunId, SpawnRequest, ToolCallRequest, WorkerResult,
};
use axon_log::{Emitter, EventLog, LogError};
use axon_store::{NewJob, RunRow, Store, StoreError};
use axon_tool::{SPAWN_TOOL, ToolContext, ToolInvoker, ToolRegistry, ToolResult};
use axon_turn::provider::Provider;
use axon_turn::types::{AssistantMessage, ProviderRequest, ToolSchema};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Static configuration for the supervisor loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Iteration bound; exceeding is a fatal `iteration_limit` failure.
    pub max_iterations: u32,
    /// Total workers a run may spawn.
    pub max_workers_per_run: u32,
    /// Spawn attempts per tool-call id before a synthetic error reply.
    pub spawn_retry_limit: u32,
    /// Max output tokens per model call.
    pub max_tokens: u32,
    /// LLM transport attempts (1 initial + retries).
    pub llm_retry_attempts: u32,
    /// Base backoff between transport retries; doubles per attempt.
    pub llm_retry_base_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_workers_per_run: 20,
            spawn_retry_limit: 3,
            max_tokens: 4096,
            llm_retry_attempts: 3,
            llm_retry_base_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Derive the engine limits from the platform configuration.
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_workers_per_run: config.max_workers_per_run,
            spawn_retry_limit: config.spawn_retry_limit,
            llm_retry_attempts: config.llm_retry_attempts,
            llm_retry_base_ms: config.llm_retry_base_ms,
            ..Self::default()
        }
    }
}

/// Supervisor-level failures. Tool-level errors never surface here —
/// they become tool replies the model reacts to.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// The LLM transport failed past its retry budget, or the response
    /// was unusable.
    #[error("llm failure ({kind}): {message}")]
    Llm {
        /// Classification for the failure event.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },

    /// The loop hit its iteration bound with work still pending.
    #[error("iteration limit reached after {iterations} iterations")]
    IterationLimit {
        /// Iterations consumed.
        iterations: i64,
    },

    /// The run was cancelled between iterations.
    #[error("run cancelled")]
    Cancelled,

    /// Persistence failed. The logical action is failed with it.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Event append failed. The logical action is failed with it.
    #[error(transparent)]
    Log(#[from] LogError),
}

impl EngineError {
    /// Classification carried on the `supervisor_failed` event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Llm { kind, .. } => *kind,
            Self::IterationLimit { .. } => ErrorKind::IterationLimit,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(_) | Self::Log(_) => ErrorKind::Internal,
        }
    }
}

/// Arguments of one `spawn_worker` call, as issued by the model.
#[derive(Debug, Deserialize)]
struct SpawnArgs {
    task: String,
    #[serde(default)]
    mode: Option<ExecutionMode>,
    #[serde(default)]
    git_repo: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    priority: i32,
}

/// The supervisor ReAct loop.
///
/// Generic over `P: Provider` (not object-safe); the orchestrator above
/// it is the object-safe boundary.
pub struct ReactEngine<P: Provider> {
    provider: P,
    registry: Arc<ToolRegistry>,
    invoker: Arc<ToolInvoker>,
    store: Store,
    log: Arc<EventLog>,
    config: EngineConfig,
}

impl<P: Provider> ReactEngine<P> {
    /// Create an engine with all dependencies.
    pub fn new(
        provider: P,
        registry: Arc<ToolRegistry>,
        invoker: Arc<ToolInvoker>,
        store: Store,
        log: Arc<EventLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            invoker,
            store,
            log,
            config,
        }
    }

    /// Run the loop for `run` until completion or interrupt.
    ///
    /// On resume entry, `worker_results` carries the finished barrier's
    /// result tuples; one tool reply per tuple is synthesized into the
    /// thread before the first prompt.
    pub async fn run(
        &self,
        run: &RunRow,
        worker_results: Option<Vec<WorkerResult>>,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError> {
        let run_id = run.run_id();
        let public_id = run.run_public_id().map_err(EngineError::Store)?;
        let thread_id = axon_core::ThreadId::from(run.thread_id);
        let owner = axon_core::OwnerId::new(run.owner_id.clone());

        let emitter = Emitter::supervisor(self.log.clone(), run_id, public_id, owner.clone());
        let tool_ctx = ToolContext {
            owner_id: owner,
            store: self.store.clone(),
            cancel: cancel.clone(),
        };

        if let Some(mut results) = worker_results {
            self.synthesize_worker_replies(thread_id, &mut results)
                .await?;
        }

        let tools = self.tool_schemas();

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let iterations = self.store.bump_run_iterations(run_id).await?;
            if iterations > self.config.max_iterations as i64 {
                return Err(EngineError::IterationLimit { iterations });
            }
            self.log
                .append(
                    run_id,
                    &public_id,
                    EventType::SupervisorIteration,
                    serde_json::json!({ "iteration": iterations }),
                )
                .await?;

            // 1. Assemble: static preamble, per-run context, history,
            //    trailing dynamic block.
            let history = self.store.thread_history(thread_id).await?;
            let active_workers = self.store.live_jobs_for_run(run_id).await?.len();
            let request = ProviderRequest {
                model: run.model.clone(),
                reasoning_effort: run.reasoning_effort.clone(),
                messages: prompt::assemble(run, &history, active_workers),
                tools: tools.clone(),
                max_tokens: Some(self.config.max_tokens),
            };

            // 2. Call the model, with bounded-backoff retry on
            //    transport errors only.
            let response = self.call_with_retry(request).await?;
            self.store
                .add_run_usage(
                    run_id,
                    response.usage.prompt_tokens,
                    response.usage.completion_tokens,
                    response.cost.unwrap_or_default(),
                )
                .await?;

            // 3. Persist the assistant message, tool-call metadata
            //    included.
            let tool_calls = if response.tool_calls.is_empty() {
                None
            } else {
                Some(response.tool_calls.clone())
            };
            self.store
                .append_message(
                    thread_id,
                    &NewMessage::assistant(response.content.clone(), tool_calls),
                )
                .await?;

            // 4. No tool calls: the run is done.
            if response.is_final() {
                return Ok(EngineOutcome::Completed {
                    content: response.content,
                });
            }

            // 5. Partition spawn calls from ordinary tools; ordinary
            //    tools run concurrently, each on its own session.
            let (spawns, others): (Vec<_>, Vec<_>) = response
                .tool_calls
                .iter()
                .cloned()
                .partition(|call| call.name == SPAWN_TOOL);

            let results = self.invoker.invoke_many(&others, &emitter, &tool_ctx).await;
            for result in &results {
                self.persist_tool_reply(thread_id, result).await?;
            }

            // 6. No spawns: loop straight into the next iteration.
            if spawns.is_empty() {
                continue;
            }

            // 7. Spawns: create jobs in status `created` (phase one)
            //    and hand control to the orchestrator.
            let created = self.create_spawn_jobs(run_id, thread_id, &spawns).await?;
            if created.is_empty() {
                // Every spawn was rejected by a guardrail; its synthetic
                // reply is already in the thread. Keep reasoning.
                continue;
            }
            return Ok(EngineOutcome::Interrupted(Interrupt::WorkersPending {
                created_jobs: created,
            }));
        }
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
        schemas.push(prompt::spawn_tool_schema());
        schemas
    }

    async fn call_with_retry(
        &self,
        request: ProviderRequest,
    ) -> Result<AssistantMessage, EngineError> {
        let attempts = self.config.llm_retry_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.llm_retry_base_ms);
        for attempt in 1..=attempts {
            match self.provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_transient() && attempt < attempts => {
                    tracing::warn!(%error, attempt, "transient llm failure, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(error) => {
                    return Err(EngineError::Llm {
                        kind: error.classify(),
                        message: error.to_string(),
                    });
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn synthesize_worker_replies(
        &self,
        thread_id: axon_core::ThreadId,
        results: &mut Vec<WorkerResult>,
    ) -> Result<(), EngineError> {
        // Replies go in the order the model issued the spawn calls, as
        // recorded on the interrupting assistant message.
        let history = self.store.thread_history(thread_id).await?;
        if let Some(issued) = history
            .iter()
            .rev()
            .find_map(|m| m.tool_calls.as_ref())
        {
            prompt::order_replies(results, issued);
        }
        for result in results.iter() {
            self.store
                .append_message(
                    thread_id,
                    &NewMessage::tool_reply(result.tool_call_id.clone(), result.reply_content()),
                )
                .await?;
        }
        Ok(())
    }

    async fn persist_tool_reply(
        &self,
        thread_id: axon_core::ThreadId,
        result: &ToolResult,
    ) -> Result<(), EngineError> {
        self.store
            .append_message(
                thread_id,
                &NewMessage::tool_reply(result.tool_call_id.clone(), result.content.clone()),
            )
            .await?;
        Ok(())
    }

    async fn create_spawn_jobs(
        &self,
        run_id: RunId,
        thread_id: axon_core::ThreadId,
        spawns: &[ToolCallRequest],
    ) -> Result<Vec<CreatedJob>, EngineError> {
        let existing = self.store.job_count_for_run(run_id).await?;
        let mut created = Vec::new();

        for call in spawns {
            let spawned_so_far = existing + created.len() as i64;
            if spawned_so_far >= self.config.max_workers_per_run as i64 {
                self.reject_spawn(
                    thread_id,
                    call,
                    ErrorKind::InvalidInput,
                    &format!(
                        "worker cap reached ({} per run)",
                        self.config.max_workers_per_run
                    ),
                )
                .await?;
                continue;
            }

            let attempts = self
                .store
                .spawn_attempts_for_tool_call(run_id, &call.id)
                .await?;
            if attempts >= self.config.spawn_retry_limit as i64 {
                self.reject_spawn(
                    thread_id,
                    call,
                    ErrorKind::RetriesExhausted,
                    &format!("spawn retried {attempts} times for this call"),
                )
                .await?;
                continue;
            }

            let args: SpawnArgs = match serde_json::from_value(call.args.clone()) {
                Ok(args) => args,
                Err(error) => {
                    self.reject_spawn(
                        thread_id,
                        call,
                        ErrorKind::InvalidInput,
                        &format!("bad spawn arguments: {error}"),
                    )
                    .await?;
                    continue;
                }
            };

            let request = SpawnRequest {
                tool_call_id: call.id.clone(),
                task: args.task,
                mode: args.mode.unwrap_or(ExecutionMode::Standard),
                git_repo: args.git_repo,
                branch: args.branch,
                priority: args.priority,
            };
            let job = self
                .store
                .create_job(
                    run_id,
                    &NewJob {
                        task: request.task.clone(),
                        mode: request.mode,
                        git_repo: request.git_repo.clone(),
                        branch: request.branch.clone(),
                        priority: request.priority,
                    },
                )
                .await?;
            created.push(CreatedJob {
                job_id: job.job_id(),
                tool_call_id: request.tool_call_id,
                task_preview: truncate(&request.task, 120),
            });
        }
        Ok(created)
    }

    async fn reject_spawn(
        &self,
        thread_id: axon_core::ThreadId,
        call: &ToolCallRequest,
        kind: ErrorKind,
        message: &str,
    ) -> Result<(), EngineError> {
        self.store
            .append_message(
                thread_id,
                &NewMessage::tool_reply(call.id.clone(), format!("[{kind}] {message}")),
            )
            .await?;
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        text.chars().take(max).collect()
    }
}
