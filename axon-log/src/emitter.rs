//! Identity-carrying event source.

use crate::log::{EventLog, LogError};
use axon_core::{EmitKind, EmitterRole, JobId, OwnerId, RunEvent, RunId, RunPublicId};
use serde_json::{Map, Value};
use std::sync::Arc;

/// An emitter publishes role-tagged events into a run's log.
///
/// Constructed at the entry point of a worker runtime or a supervisor
/// iteration, and passed by reference to every tool-call site. Role is
/// a constructor-time property: `emit` prepends `worker_`/`supervisor_`
/// from the object itself, so attribution stays correct when tool calls
/// fan out across tasks. Discard the emitter when the frame exits.
#[derive(Clone)]
pub struct Emitter {
    role: EmitterRole,
    run_id: RunId,
    run_public_id: RunPublicId,
    owner_id: OwnerId,
    job_id: Option<JobId>,
    log: Arc<EventLog>,
}

impl Emitter {
    /// An emitter for the supervisor loop of a run.
    pub fn supervisor(
        log: Arc<EventLog>,
        run_id: RunId,
        run_public_id: RunPublicId,
        owner_id: OwnerId,
    ) -> Self {
        Self {
            role: EmitterRole::Supervisor,
            run_id,
            run_public_id,
            owner_id,
            job_id: None,
            log,
        }
    }

    /// An emitter for one worker, carrying both its worker id and its
    /// job id so clients can reconcile placeholders keyed by either.
    pub fn worker(
        log: Arc<EventLog>,
        run_id: RunId,
        run_public_id: RunPublicId,
        owner_id: OwnerId,
        worker_id: axon_core::WorkerId,
        job_id: JobId,
    ) -> Self {
        Self {
            role: EmitterRole::Worker(worker_id),
            run_id,
            run_public_id,
            owner_id,
            job_id: Some(job_id),
            log,
        }
    }

    /// The emitter's role.
    pub fn role(&self) -> &EmitterRole {
        &self.role
    }

    /// The run this emitter publishes into.
    pub fn run_public_id(&self) -> &RunPublicId {
        &self.run_public_id
    }

    /// The owner the frame acts for. Tools use this for owner-scoped
    /// store reads.
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Publish an event. The role decides the concrete event type and
    /// the emitter's stable identifiers are merged into the payload.
    pub async fn emit(&self, kind: EmitKind, payload: Value) -> Result<RunEvent, LogError> {
        let event_type = self.role.event_type(kind);
        let mut object = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(LogError::InvalidPayload(format!(
                    "{event_type} payload must be a JSON object, got {other}"
                )));
            }
        };
        object.insert(
            "run_public_id".into(),
            Value::String(self.run_public_id.to_string()),
        );
        if let EmitterRole::Worker(worker_id) = &self.role {
            object.insert("worker_id".into(), Value::String(worker_id.to_string()));
        }
        if let Some(job_id) = self.job_id {
            object.insert("job_id".into(), Value::Number(job_id.as_i64().into()));
        }
        self.log
            .append(self.run_id, &self.run_public_id, event_type, Value::Object(object))
            .await
    }
}
