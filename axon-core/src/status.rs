//! Run, job, and barrier state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet picked up by the orchestrator.
    Queued,
    /// The supervisor loop is executing.
    Running,
    /// Interrupted: a barrier exists and workers are outstanding.
    Waiting,
    /// Terminal: the supervisor completed normally.
    Success,
    /// Terminal: a supervisor-level error ended the run.
    Failed,
    /// Terminal: cancelled by the owner.
    Cancelled,
    /// Terminal: the run-level deadline elapsed.
    Timeout,
}

impl RunStatus {
    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    /// Whether this status ends the run. `finished_at` is stamped exactly
    /// once, on the transition into a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Terminal states accept no further transitions. `waiting` is only
    /// reachable from `running` (an interrupt), and only leaves via
    /// `running` (barrier resume) or a terminal status.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(
                next,
                Self::Waiting | Self::Success | Self::Failed | Self::Cancelled | Self::Timeout
            ),
            Self::Waiting => matches!(
                next,
                Self::Running | Self::Failed | Self::Cancelled | Self::Timeout
            ),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Status of a durable worker job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// First phase of spawn: the row exists but is invisible to claim
    /// queries until its barrier-job row is installed.
    Created,
    /// Admitted to the queue, claimable.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Terminal: the worker reported success.
    Completed,
    /// Terminal: the worker reported failure or retries ran out.
    Failed,
    /// Terminal: the deadline or heartbeat window elapsed.
    Timeout,
    /// Terminal: cancelled with the run.
    Cancelled,
}

impl JobStatus {
    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Status of a worker barrier. At most one non-terminal barrier exists
/// per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierStatus {
    /// Workers are outstanding.
    Waiting,
    /// All workers accounted for; the resume directive has been handed
    /// to exactly one caller.
    Resuming,
    /// The resume was delivered to the orchestrator (or the run ended).
    Completed,
}

impl BarrierStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Resuming => "resuming",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for BarrierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for BarrierStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "waiting" => Ok(Self::Waiting),
            "resuming" => Ok(Self::Resuming),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown barrier status: {other}")),
        }
    }
}

/// Status of one barrier member (one worker slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierJobStatus {
    /// Row installed, job not yet admitted to the queue.
    Created,
    /// The job is claimable or running.
    Queued,
    /// The worker completed and its result is cached on the row.
    Completed,
    /// The worker failed and its error is cached on the row.
    Failed,
    /// The barrier deadline elapsed before the worker finished.
    Timeout,
}

impl BarrierJobStatus {
    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Whether this member has been accounted for by the barrier.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for BarrierJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for BarrierJobStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown barrier job status: {other}")),
        }
    }
}

/// How a worker executes its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// In-process bounded ReAct loop with the worker tool allowlist.
    Standard,
    /// Clone a repository and drive an external coding agent in an
    /// isolated directory.
    Workspace,
}

impl ExecutionMode {
    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Workspace => "workspace",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for ExecutionMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "standard" => Ok(Self::Standard),
            "workspace" => Ok(Self::Workspace),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_terminal_states_accept_nothing() {
        for terminal in [
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Timeout,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(RunStatus::Running));
            assert!(!terminal.can_transition_to(RunStatus::Queued));
        }
    }

    #[test]
    fn waiting_only_reachable_from_running() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Waiting));
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Waiting));
        assert!(!RunStatus::Waiting.can_transition_to(RunStatus::Waiting));
    }

    #[test]
    fn waiting_resumes_to_running() {
        assert!(RunStatus::Waiting.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Waiting.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Waiting.can_transition_to(RunStatus::Success));
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Waiting,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Timeout,
        ] {
            assert_eq!(RunStatus::try_from(s.as_str().to_string()).unwrap(), s);
        }
        for s in [
            JobStatus::Created,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Timeout,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::try_from(s.as_str().to_string()).unwrap(), s);
        }
    }

    #[test]
    fn created_jobs_are_not_terminal() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(!BarrierJobStatus::Created.is_finished());
        assert!(BarrierJobStatus::Timeout.is_finished());
    }
}
