//! The closed error-kind taxonomy shared by every component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification attached to every recoverable and terminal failure.
///
/// This set is closed: components map their internal errors onto it
/// before the failure crosses a boundary (a tool-reply message, a
/// `*_failed` event payload, a barrier-job row). The supervisor LLM sees
/// these strings and adapts, so renaming a variant is a wire break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller supplied arguments that failed validation.
    InvalidInput,
    /// A tool exceeded its per-call timeout.
    ToolTimeout,
    /// The requested tool is not in the caller's allowlist or registry.
    ToolNotFound,
    /// The tool exists but the caller's role may not invoke it.
    ToolPermissionDenied,
    /// The tool ran and returned an error.
    ToolExecutionError,
    /// A downstream connector is unreachable. Non-fatal: the supervisor
    /// is expected to fall back.
    ConnectorUnavailable,
    /// The LLM transport failed (network, 5xx, rate limit past retries).
    LlmTransportError,
    /// The LLM responded with something the engine could not parse.
    LlmInvalidResponse,
    /// The supervisor loop hit its iteration bound.
    IterationLimit,
    /// A worker exceeded its deadline.
    WorkerTimeout,
    /// A worker died without reporting.
    WorkerCrashed,
    /// A job was retried past its attempt cap.
    RetriesExhausted,
    /// The run was cancelled by its owner.
    Cancelled,
    /// An invariant violation or unclassified internal failure.
    Internal,
}

impl ErrorKind {
    /// Stable string form used in event payloads and tool-reply messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolPermissionDenied => "tool_permission_denied",
            Self::ToolExecutionError => "tool_execution_error",
            Self::ConnectorUnavailable => "connector_unavailable",
            Self::LlmTransportError => "llm_transport_error",
            Self::LlmInvalidResponse => "llm_invalid_response",
            Self::IterationLimit => "iteration_limit",
            Self::WorkerTimeout => "worker_timeout",
            Self::WorkerCrashed => "worker_crashed",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Whether the ReAct loop may continue after surfacing this kind to
    /// the model as a tool reply. Supervisor-level kinds terminate the
    /// run instead.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::IterationLimit | Self::LlmTransportError | Self::Cancelled | Self::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::WorkerTimeout).unwrap(),
            "\"worker_timeout\""
        );
        assert_eq!(
            serde_json::from_str::<ErrorKind>("\"retries_exhausted\"").unwrap(),
            ErrorKind::RetriesExhausted
        );
    }

    #[test]
    fn connector_unavailable_is_recoverable() {
        assert!(ErrorKind::ConnectorUnavailable.is_recoverable());
        assert!(ErrorKind::WorkerTimeout.is_recoverable());
        assert!(!ErrorKind::IterationLimit.is_recoverable());
        assert!(!ErrorKind::Cancelled.is_recoverable());
    }
}
