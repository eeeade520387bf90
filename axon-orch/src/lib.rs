#![deny(missing_docs)]
//! Run orchestration for axon.
//!
//! The [`Orchestrator`] owns a run's lifecycle: it starts the engine,
//! installs the barrier when the engine interrupts with pending
//! workers, re-enters the engine exactly once when the barrier
//! releases, finalizes terminal states, and drives the background
//! sweepers (barrier deadlines, stale-job reclaim). It also implements
//! the worker pool's [`CompletionSink`], which is how worker terminal
//! reports reach the barrier's single-resume step.
//!
//! Event ordering is owned here: `worker_spawned` and
//! `supervisor_interrupted` are appended *before* the install
//! transaction admits jobs to the queue, so no claimer can observe a
//! job whose interrupt is not yet in the log; `supervisor_resumed` is
//! appended only after every member's terminal event.

mod orchestrator;

pub use orchestrator::{OrchConfig, OrchError, Orchestrator};
