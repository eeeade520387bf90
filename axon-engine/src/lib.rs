#![deny(missing_docs)]
//! The supervisor ReAct loop.
//!
//! No graph machinery: one explicit loop with persistence points
//! between iterations. Each cycle assembles the prompt (static content
//! first, so upstream prompt caches can match), calls the model,
//! persists the assistant message, executes non-spawn tool calls
//! concurrently, and either loops, completes, or returns a typed
//! [`Interrupt`] when the model spawned workers. The interrupt is the
//! only way control leaves the loop without finishing the run; the
//! orchestrator owns what happens next.

mod engine;
mod prompt;

pub use engine::{EngineConfig, EngineError, ReactEngine};
