#![deny(missing_docs)]
//! Tool interface and invoker for axon.
//!
//! Defines the [`ToolDyn`] trait for object-safe tool abstraction,
//! [`ToolRegistry`] for managing collections of tools, and
//! [`ToolInvoker`] — the single path every tool call takes: emit
//! started, resolve against the caller's allowlist, execute under a
//! timeout, persist the full result as an artifact, emit completed or
//! failed. Errors never propagate past the invoker; they become
//! classified tool replies the model can react to.

mod invoker;
mod registry;

pub use invoker::{ToolInvoker, ToolResult};
pub use registry::{ToolContext, ToolDyn, ToolError, ToolRegistry};

/// The reserved name of the spawn tool. Spawn calls never execute as
/// tools — the engine partitions them out and turns them into worker
/// jobs plus an interrupt.
pub const SPAWN_TOOL: &str = "spawn_worker";
