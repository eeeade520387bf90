//! The typed interrupt — how control leaves the supervisor loop — and
//! the worker-result tuples that re-enter it on resume.

use crate::error::ErrorKind;
use crate::id::{JobId, ToolCallId, WorkerId};
use crate::status::{BarrierJobStatus, ExecutionMode};
use serde::{Deserialize, Serialize};

/// A `spawn_worker` tool call, parsed and validated out of the model's
/// arguments. Spawn calls never execute as tools: they become durable
/// jobs and an interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// The supervisor's tool-call id. Needed later to construct the
    /// reply message for exactly this call.
    pub tool_call_id: ToolCallId,
    /// Task text handed to the worker.
    pub task: String,
    /// Execution mode.
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,
    /// Repository URL, workspace mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
    /// Base branch, workspace mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Queue priority. Higher claims first; ties go to the oldest job.
    #[serde(default)]
    pub priority: i32,
}

fn default_mode() -> ExecutionMode {
    ExecutionMode::Standard
}

/// One job created (phase one, invisible to claimants) for a spawn call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedJob {
    /// The durable job row.
    pub job_id: JobId,
    /// The spawn call this job answers.
    pub tool_call_id: ToolCallId,
    /// Short task preview for events.
    pub task_preview: String,
}

/// The typed interrupt payload returned by the engine. This is the sole
/// mechanism by which control leaves the loop without completing the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interrupt {
    /// Worker jobs were created and a barrier must be installed before
    /// they are admitted to the queue.
    WorkersPending {
        /// The jobs created in phase one, still in status `created`.
        created_jobs: Vec<CreatedJob>,
    },
}

/// What one supervisor-loop invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// The model produced a final response; the run is done.
    Completed {
        /// Final assistant text.
        content: String,
    },
    /// Control transfers to the orchestrator with workers pending.
    Interrupted(Interrupt),
}

/// One worker's outcome, as handed back to the supervisor on resume.
///
/// The full set for a barrier is the resume directive: exactly one
/// caller ever observes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// The spawn call this result answers.
    pub tool_call_id: ToolCallId,
    /// The job that ran (or timed out unclaimed).
    pub job_id: JobId,
    /// The worker that claimed the job, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Terminal barrier-job status.
    pub status: BarrierJobStatus,
    /// Cached result text on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error classification on failure or timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable error on failure or timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResult {
    /// Render this result as the content of the tool reply the model
    /// sees on resume.
    pub fn reply_content(&self) -> String {
        match self.status {
            BarrierJobStatus::Completed => self
                .result
                .clone()
                .unwrap_or_else(|| "worker completed with no output".into()),
            _ => {
                let kind = self.error_kind.unwrap_or(ErrorKind::Internal);
                let detail = self.error.as_deref().unwrap_or("no detail");
                format!("worker {}: [{}] {}", self.status, kind, detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interrupt_payload_wire_shape() {
        let interrupt = Interrupt::WorkersPending {
            created_jobs: vec![CreatedJob {
                job_id: JobId::from(5),
                tool_call_id: ToolCallId::new("tc-1"),
                task_preview: "run df -h".into(),
            }],
        };
        let value = serde_json::to_value(&interrupt).unwrap();
        assert_eq!(value["kind"], "workers_pending");
        assert_eq!(value["created_jobs"][0]["job_id"], 5);
        assert_eq!(value["created_jobs"][0]["tool_call_id"], "tc-1");
    }

    #[test]
    fn spawn_request_defaults_to_standard_mode() {
        let req: SpawnRequest = serde_json::from_value(json!({
            "tool_call_id": "tc-9",
            "task": "check disk space"
        }))
        .unwrap();
        assert_eq!(req.mode, ExecutionMode::Standard);
        assert_eq!(req.priority, 0);
    }

    #[test]
    fn timeout_reply_carries_the_error_kind() {
        let result = WorkerResult {
            tool_call_id: ToolCallId::new("tc-b"),
            job_id: JobId::from(2),
            worker_id: None,
            status: BarrierJobStatus::Timeout,
            result: None,
            error_kind: Some(ErrorKind::WorkerTimeout),
            error: Some("deadline elapsed".into()),
        };
        let reply = result.reply_content();
        assert!(reply.contains("worker_timeout"));
        assert!(reply.contains("deadline elapsed"));
    }

    #[test]
    fn completed_reply_is_the_result_text() {
        let result = WorkerResult {
            tool_call_id: ToolCallId::new("tc-a"),
            job_id: JobId::from(1),
            worker_id: Some(WorkerId::new("w1")),
            status: BarrierJobStatus::Completed,
            result: Some("disk is 40% full".into()),
            error_kind: None,
            error: None,
        };
        assert_eq!(result.reply_content(), "disk is 40% full");
    }
}
