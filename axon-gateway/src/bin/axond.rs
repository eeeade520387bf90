//! axond — the axon orchestration daemon.
//!
//! Wires the store, event log, provider, engine, orchestrator, worker
//! pool, and sweepers together, then serves the HTTP surface.

use axon_artifact::ArtifactStore;
use axon_core::CoreConfig;
use axon_engine::{EngineConfig, ReactEngine};
use axon_gateway::{AppState, router};
use axon_log::EventLog;
use axon_orch::{OrchConfig, Orchestrator};
use axon_provider_anthropic::AnthropicProvider;
use axon_store::Store;
use axon_tool::{ToolInvoker, ToolRegistry};
use axon_worker::{PoolConfig, WorkerConfig, WorkerPool, WorkerRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CoreConfig::from_env();
    tracing::info!(bind = %config.bind_addr, db = %config.database_url, "axond starting");

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| "ANTHROPIC_API_KEY is required")?;

    let store = Store::connect(&config.database_url).await?;
    let log = Arc::new(EventLog::new(store.clone()));
    let artifacts = ArtifactStore::new(&config.artifact_root);

    // Supervisors and workers get distinct registries; tool
    // implementations are registered here by the embedding deployment.
    let supervisor_tools = Arc::new(ToolRegistry::new());
    let worker_tools = Arc::new(ToolRegistry::new());

    let supervisor_invoker = Arc::new(ToolInvoker::new(
        supervisor_tools.clone(),
        artifacts.clone(),
        config.tool_timeout(),
    ));
    let worker_invoker = Arc::new(ToolInvoker::new(
        worker_tools.clone(),
        artifacts.clone(),
        config.tool_timeout(),
    ));

    let engine = ReactEngine::new(
        AnthropicProvider::new(api_key.clone()),
        supervisor_tools,
        supervisor_invoker,
        store.clone(),
        log.clone(),
        EngineConfig::from_core(&config),
    );
    let orch = Arc::new(Orchestrator::new(
        engine,
        store.clone(),
        log.clone(),
        OrchConfig {
            barrier_deadline: Duration::from_secs(config.barrier_deadline_secs),
            job_stale_after: Duration::from_secs(config.job_stale_secs),
            job_max_attempts: config.job_max_attempts,
            sweep_interval: Duration::from_secs(5),
        },
    ));

    let runtime = Arc::new(WorkerRuntime::new(
        Arc::new(AnthropicProvider::new(api_key)),
        worker_tools,
        worker_invoker,
        store.clone(),
        log.clone(),
        artifacts,
        WorkerConfig {
            max_iterations: config.worker_max_iterations,
            llm_retry_attempts: config.llm_retry_attempts,
            llm_retry_base_ms: config.llm_retry_base_ms,
            workspace_timeout: config.workspace_timeout(),
            workroot: std::path::PathBuf::from(&config.artifact_root).join("workspaces"),
            ..WorkerConfig::default()
        },
    ));

    let shutdown = CancellationToken::new();
    let pool = Arc::new(WorkerPool::new(
        runtime,
        store.clone(),
        log.clone(),
        Arc::new(orch.clone()),
        PoolConfig {
            size: config.worker_pool_size,
            heartbeat_interval: config.heartbeat_interval(),
            ..PoolConfig::default()
        },
        shutdown.clone(),
    ));
    tokio::spawn(pool.run());
    tokio::spawn(orch.clone().run_sweeper(shutdown.clone()));

    let state = Arc::new(AppState {
        store,
        log,
        orch,
        queue_capacity: config.subscriber_queue_capacity,
    });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
