#![deny(missing_docs)]
//! Ephemeral worker runtimes for axon.
//!
//! A worker claims one durable job, runs it to completion, and reports
//! through the barrier coordinator. Two execution paths:
//!
//! - **standard** — an in-process bounded ReAct loop over the worker
//!   tool allowlist (which never contains `spawn_worker`, so nesting is
//!   structurally impossible). The worker's thread, every tool call,
//!   and the final result land in its artifact directory, and
//!   fine-grained `worker_tool_*` events go to the run's log.
//! - **workspace** — a validated `git clone` into an isolated
//!   directory, a per-run branch, and an external coding-agent
//!   subprocess in its own process group. Timeout kills the whole
//!   group; stdout and the final diff are captured as artifacts.
//!
//! [`WorkerPool`] bounds concurrency, claims jobs, keeps heartbeats
//! fresh, and files each worker's terminal report.

mod pool;
mod runtime;
pub mod workspace;

pub use pool::{CompletionSink, PoolConfig, WorkerPool};
pub use runtime::{WorkerConfig, WorkerError, WorkerReport, WorkerRuntime};
