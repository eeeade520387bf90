//! Platform configuration with conservative defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable limits and intervals for the orchestration core.
///
/// Every field has a working default; `from_env` overrides from
/// `AXON_*` environment variables in the `axond` binary. Libraries take
/// the struct, never the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Supervisor ReAct iteration bound. Exceeding is `iteration_limit`.
    pub max_iterations: u32,
    /// Worker ReAct iteration bound.
    pub worker_max_iterations: u32,
    /// Total workers a run may spawn across all iterations.
    pub max_workers_per_run: u32,
    /// Spawn retries per tool-call id before a synthetic error reply.
    pub spawn_retry_limit: u32,
    /// Concurrent workers per process.
    pub worker_pool_size: usize,
    /// Default per-tool timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Worker heartbeat interval in seconds. Jobs with a heartbeat older
    /// than twice this are eligible for reclaim.
    pub heartbeat_interval_secs: u64,
    /// Running jobs with a heartbeat older than this are swept back to
    /// the queue.
    pub job_stale_secs: u64,
    /// Claim attempts before a job fails with `retries_exhausted`.
    pub job_max_attempts: i32,
    /// Barrier deadline in seconds, applied when a spawn names none.
    pub barrier_deadline_secs: u64,
    /// Workspace-mode subprocess timeout in seconds.
    pub workspace_timeout_secs: u64,
    /// LLM transport attempts (1 initial + retries).
    pub llm_retry_attempts: u32,
    /// Base backoff between LLM transport retries, in milliseconds.
    /// Doubles per attempt.
    pub llm_retry_base_ms: u64,
    /// Per-subscriber event queue bound.
    pub subscriber_queue_capacity: usize,
    /// Root directory for worker artifacts.
    pub artifact_root: String,
    /// Database URL (SQLite path or server DSN).
    pub database_url: String,
    /// HTTP bind address for the gateway.
    pub bind_addr: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            worker_max_iterations: 25,
            max_workers_per_run: 20,
            spawn_retry_limit: 3,
            worker_pool_size: 5,
            tool_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            job_stale_secs: 120,
            job_max_attempts: 3,
            barrier_deadline_secs: 600,
            workspace_timeout_secs: 900,
            llm_retry_attempts: 3,
            llm_retry_base_ms: 250,
            subscriber_queue_capacity: 256,
            artifact_root: "./data/artifacts".into(),
            database_url: "sqlite://./data/axon.db".into(),
            bind_addr: "127.0.0.1:8400".into(),
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by any `AXON_*` variables present in the
    /// environment. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        read_env("AXON_MAX_ITERATIONS", &mut cfg.max_iterations);
        read_env("AXON_WORKER_MAX_ITERATIONS", &mut cfg.worker_max_iterations);
        read_env("AXON_MAX_WORKERS_PER_RUN", &mut cfg.max_workers_per_run);
        read_env("AXON_WORKER_POOL_SIZE", &mut cfg.worker_pool_size);
        read_env("AXON_TOOL_TIMEOUT_SECS", &mut cfg.tool_timeout_secs);
        read_env("AXON_HEARTBEAT_INTERVAL_SECS", &mut cfg.heartbeat_interval_secs);
        read_env("AXON_JOB_STALE_SECS", &mut cfg.job_stale_secs);
        read_env("AXON_JOB_MAX_ATTEMPTS", &mut cfg.job_max_attempts);
        read_env("AXON_BARRIER_DEADLINE_SECS", &mut cfg.barrier_deadline_secs);
        read_env("AXON_WORKSPACE_TIMEOUT_SECS", &mut cfg.workspace_timeout_secs);
        if let Ok(v) = std::env::var("AXON_ARTIFACT_ROOT") {
            cfg.artifact_root = v;
        }
        if let Ok(v) = std::env::var("AXON_DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Ok(v) = std::env::var("AXON_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        cfg
    }

    /// Per-tool timeout as a [`Duration`].
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Workspace subprocess timeout as a [`Duration`].
    pub fn workspace_timeout(&self) -> Duration {
        Duration::from_secs(self.workspace_timeout_secs)
    }
}

fn read_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(parsed) = raw.parse() {
            *slot = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.max_iterations, 25);
        assert_eq!(cfg.max_workers_per_run, 20);
        assert_eq!(cfg.worker_pool_size, 5);
        assert_eq!(cfg.tool_timeout_secs, 60);
        assert_eq!(cfg.job_stale_secs, 120);
        assert_eq!(cfg.job_max_attempts, 3);
        assert_eq!(cfg.subscriber_queue_capacity, 256);
    }
}
