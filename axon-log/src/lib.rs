#![deny(missing_docs)]
//! The append-only run event log and the emitters that feed it.
//!
//! [`EventLog`] is the single source of observable truth for a run:
//! every append is transactional (the store assigns the per-run
//! sequence number under the run row's lock) and is then published to
//! the run's in-process broadcast channel for live subscribers.
//!
//! [`Emitter`] bakes role identity — supervisor or a specific worker —
//! into a small value object constructed at the entry point of a frame
//! and passed explicitly to every tool-call site. Tool code never asks
//! ambient context "am I a worker?"; under task fan-out that answer
//! goes wrong. Emitters hold the log handle and identifiers, never a
//! database session.

mod emitter;
mod log;

pub use emitter::Emitter;
pub use log::{EventLog, LogError};
