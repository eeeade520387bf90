#![deny(missing_docs)]
//! Relational persistence for axon.
//!
//! One [`Store`] wraps the connection pool; each module contributes the
//! operations for its tables:
//!
//! - `threads` — conversation threads and messages, owner-scoped reads
//! - `runs` — run rows, the status state machine, usage accumulators
//! - `events` — the append-only per-run event log
//! - `jobs` — the durable worker queue with atomic claim and reclaim
//! - `barriers` — two-phase barrier install and the single-resume step
//!
//! The pool is the session factory: every operation acquires its own
//! connection (or transaction) and releases it before returning. Nothing
//! in this crate hands a live connection across an await boundary it
//! does not own.
//!
//! SQL stays in the portable subset shared by the embedded and server
//! dialects; the one embedded-specific requirement is `UPDATE …
//! RETURNING` on a LIMIT-1 subquery for the atomic claim.

pub mod barriers;
pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod runs;
pub mod threads;

pub use barriers::{BarrierRow, MemberReport};
pub use db::Store;
pub use error::StoreError;
pub use jobs::{JobRow, NewJob};
pub use runs::RunRow;
