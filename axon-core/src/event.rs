//! The run-event taxonomy and wire envelope.

use crate::id::{EventId, RunPublicId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of event types a run can emit.
///
/// `supervisor_*` and `worker_*` prefixes are attribution: they are
/// stamped by the emitter's role, never inferred from ambient context.
/// `heartbeat` is the single unprefixed type, shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The orchestrator picked up the run.
    SupervisorStarted,
    /// One ReAct iteration began.
    SupervisorIteration,
    /// The supervisor dispatched a tool call.
    SupervisorToolStarted,
    /// A supervisor tool call returned successfully.
    SupervisorToolCompleted,
    /// A supervisor tool call failed.
    SupervisorToolFailed,
    /// A worker job was created for a spawn call.
    WorkerSpawned,
    /// A worker claimed its job and began executing.
    WorkerStarted,
    /// A worker dispatched a tool call.
    WorkerToolStarted,
    /// A worker tool call returned successfully.
    WorkerToolCompleted,
    /// A worker tool call failed.
    WorkerToolFailed,
    /// A worker finished successfully.
    WorkerComplete,
    /// A worker finished with an error.
    WorkerFailed,
    /// The supervisor yielded to a worker barrier.
    SupervisorInterrupted,
    /// The barrier released and the supervisor loop re-entered.
    SupervisorResumed,
    /// The run completed successfully.
    SupervisorComplete,
    /// The run ended with a supervisor-level failure.
    SupervisorFailed,
    /// Liveness signal. Coalescible on congested streams.
    Heartbeat,
}

impl EventType {
    /// Stable string form used in the database and on the SSE wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupervisorStarted => "supervisor_started",
            Self::SupervisorIteration => "supervisor_iteration",
            Self::SupervisorToolStarted => "supervisor_tool_started",
            Self::SupervisorToolCompleted => "supervisor_tool_completed",
            Self::SupervisorToolFailed => "supervisor_tool_failed",
            Self::WorkerSpawned => "worker_spawned",
            Self::WorkerStarted => "worker_started",
            Self::WorkerToolStarted => "worker_tool_started",
            Self::WorkerToolCompleted => "worker_tool_completed",
            Self::WorkerToolFailed => "worker_tool_failed",
            Self::WorkerComplete => "worker_complete",
            Self::WorkerFailed => "worker_failed",
            Self::SupervisorInterrupted => "supervisor_interrupted",
            Self::SupervisorResumed => "supervisor_resumed",
            Self::SupervisorComplete => "supervisor_complete",
            Self::SupervisorFailed => "supervisor_failed",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Structural events carry state a client cannot reconstruct and are
    /// never dropped by a stream subscriber. Heartbeats are the only
    /// coalescible type: a newer one supersedes an older one.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Heartbeat)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for EventType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        serde_json::from_value(serde_json::Value::String(s.clone()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}

/// One record in a run's append-only timeline.
///
/// `event_id` is strictly increasing per run; `(run_public_id, event_id)`
/// is the deduplication key clients use under at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic per-run sequence number.
    pub event_id: EventId,
    /// The run this event belongs to.
    pub run_public_id: RunPublicId,
    /// Event type from the closed taxonomy.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Append time, serialized RFC-3339.
    pub timestamp: DateTime<Utc>,
    /// JSON payload. Always an object; `worker_*` payloads carry both
    /// `job_id` and `worker_id` whenever either is known.
    pub payload: serde_json::Value,
}

/// The identity an emitter stamps onto every event it publishes.
///
/// Role is fixed at construction and travels with the emitter object —
/// never read from ambient task context, which goes wrong under fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitterRole {
    /// The supervisor loop of a run.
    Supervisor,
    /// One worker, identified for event attribution.
    Worker(WorkerId),
}

impl EmitterRole {
    /// Map an emit subtype to the concrete event type for this role.
    pub fn event_type(&self, kind: EmitKind) -> EventType {
        match (self, kind) {
            (_, EmitKind::Heartbeat) => EventType::Heartbeat,
            (Self::Supervisor, EmitKind::ToolStarted) => EventType::SupervisorToolStarted,
            (Self::Supervisor, EmitKind::ToolCompleted) => EventType::SupervisorToolCompleted,
            (Self::Supervisor, EmitKind::ToolFailed) => EventType::SupervisorToolFailed,
            (Self::Supervisor, EmitKind::Complete) => EventType::SupervisorComplete,
            (Self::Supervisor, EmitKind::Failed) => EventType::SupervisorFailed,
            (Self::Worker(_), EmitKind::ToolStarted) => EventType::WorkerToolStarted,
            (Self::Worker(_), EmitKind::ToolCompleted) => EventType::WorkerToolCompleted,
            (Self::Worker(_), EmitKind::ToolFailed) => EventType::WorkerToolFailed,
            (Self::Worker(_), EmitKind::Complete) => EventType::WorkerComplete,
            (Self::Worker(_), EmitKind::Failed) => EventType::WorkerFailed,
        }
    }
}

/// The role-relative subtypes an emitter can publish.
///
/// Lifecycle events outside this set (`supervisor_started`,
/// `worker_spawned`, the interrupt/resume pair) are appended directly by
/// the orchestrator, which knows the lifecycle; emitters only speak the
/// subtypes that make sense from inside a tool-executing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitKind {
    /// A tool call was dispatched.
    ToolStarted,
    /// A tool call returned successfully.
    ToolCompleted,
    /// A tool call failed.
    ToolFailed,
    /// The frame finished successfully.
    Complete,
    /// The frame finished with an error.
    Failed,
    /// Liveness signal.
    Heartbeat,
}
