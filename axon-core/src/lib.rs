//! # axon-core — shared types for the axon orchestration platform
//!
//! This crate defines the vocabulary every other axon crate speaks:
//! typed identifiers, run/job/barrier state machines, the closed run-event
//! taxonomy, the thread message model, the closed error-kind set, and the
//! typed interrupt that carries control out of the supervisor loop.
//!
//! ## Design Principle
//!
//! Every type here is wire-stable: serde representations are explicit
//! (snake_case tags, RFC-3339 timestamps, decimal-as-string costs) because
//! these types cross the event stream, the database, and the artifact
//! store. Behavior lives in the component crates; this crate is the
//! contract between them.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod message;
pub mod spawn;
pub mod status;

// Re-exports for convenience
pub use config::CoreConfig;
pub use error::ErrorKind;
pub use event::{EmitKind, EmitterRole, EventType, RunEvent};
pub use id::{BarrierId, EventId, JobId, OwnerId, RunId, RunPublicId, ThreadId, ToolCallId, WorkerId};
pub use message::{ChatRole, NewMessage, Thread, ThreadMessage, ToolCallRequest};
pub use spawn::{CreatedJob, EngineOutcome, Interrupt, SpawnRequest, WorkerResult};
pub use status::{BarrierJobStatus, BarrierStatus, ExecutionMode, JobStatus, RunStatus};
