//! The LLM boundary of the orchestration core.
//!
//! [`Provider`] is the one capability the supervisor and worker loops
//! consume: hand over a request, get back a complete assistant message.
//! The trait uses RPITIT (return-position `impl Trait` in traits) and is
//! intentionally NOT object-safe — the engine is generic over
//! `P: Provider`, and the object-safe boundary sits above it at the
//! orchestrator.

use crate::types::{AssistantMessage, ProviderRequest};
use axon_core::ErrorKind;
use std::future::Future;
use thiserror::Error;

/// Failures crossing the LLM boundary.
///
/// Backends map their wire-level outcomes onto these variants once, at
/// the edge; the loops never inspect HTTP statuses or SDK errors. The
/// split the loops care about is transient-vs-not ([`is_transient`])
/// and transport-vs-content ([`classify`]).
///
/// [`is_transient`]: ProviderError::is_transient
/// [`classify`]: ProviderError::classify
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No response at all: connect failure, TLS, DNS, request timeout.
    #[error("llm backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with an error status. Retry policy hinges
    /// on whether the status is a server fault.
    #[error("llm backend returned HTTP {status}: {detail}")]
    Upstream {
        /// HTTP status code from the backend.
        status: u16,
        /// Response body, for the failure event.
        detail: String,
    },

    /// The backend throttled the request. Back off and retry.
    #[error("llm backend throttled the request")]
    Throttled,

    /// Credentials were rejected. Retrying cannot help; the run fails
    /// and the operator fixes the key.
    #[error("llm credentials rejected: {0}")]
    CredentialsRejected(String),

    /// Bytes arrived but did not decode into an assistant message.
    #[error("llm response did not decode: {0}")]
    Undecodable(String),

    /// The response decoded but cannot drive the loop: truncated
    /// output, or a message missing what the contract requires.
    #[error("llm response unusable: {0}")]
    Unusable(String),

    /// Catch-all for backend-specific failures.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Whether a retry with backoff is worthwhile. Throttling, transport
    /// loss, and server faults are transient; everything else fails the
    /// call immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttled | Self::Unreachable(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map onto the platform's closed error-kind set, as carried on
    /// `supervisor_failed`/`worker_failed` events: content problems are
    /// `llm_invalid_response`, everything else is `llm_transport_error`.
    pub fn classify(&self) -> ErrorKind {
        match self {
            Self::Undecodable(_) | Self::Unusable(_) => ErrorKind::LlmInvalidResponse,
            _ => ErrorKind::LlmTransportError,
        }
    }
}

/// LLM provider interface.
///
/// Each backend implements this trait and owns its API shape, pricing,
/// and capability knowledge (e.g. whether a model accepts a reasoning
/// hint). Token streaming is a backend concern: a backend may stream
/// internally, but the [`AssistantMessage`] it returns must carry the
/// complete `tool_calls` list.
pub trait Provider: Send + Sync {
    /// Send a completion request to the provider.
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl Future<Output = Result<AssistantMessage, ProviderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_faults_are_transient_client_faults_are_not() {
        assert!(
            ProviderError::Upstream {
                status: 503,
                detail: "overloaded".into()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::Upstream {
                status: 400,
                detail: "bad request".into()
            }
            .is_transient()
        );
        assert!(ProviderError::Throttled.is_transient());
        assert!(ProviderError::Unreachable("connect refused".into()).is_transient());
        assert!(!ProviderError::CredentialsRejected("expired key".into()).is_transient());
        assert!(!ProviderError::Undecodable("not json".into()).is_transient());
        assert!(!ProviderError::Unusable("truncated".into()).is_transient());
    }

    #[test]
    fn classification_splits_transport_from_content() {
        assert_eq!(
            ProviderError::Throttled.classify(),
            ErrorKind::LlmTransportError
        );
        assert_eq!(
            ProviderError::Upstream {
                status: 502,
                detail: String::new()
            }
            .classify(),
            ErrorKind::LlmTransportError
        );
        assert_eq!(
            ProviderError::CredentialsRejected(String::new()).classify(),
            ErrorKind::LlmTransportError
        );
        assert_eq!(
            ProviderError::Undecodable("bad json".into()).classify(),
            ErrorKind::LlmInvalidResponse
        );
        assert_eq!(
            ProviderError::Unusable("no content".into()).classify(),
            ErrorKind::LlmInvalidResponse
        );
    }

    #[test]
    fn upstream_detail_reaches_the_failure_event_text() {
        let error = ProviderError::Upstream {
            status: 529,
            detail: "overloaded_error".into(),
        };
        let text = error.to_string();
        assert!(text.contains("529"));
        assert!(text.contains("overloaded_error"));
    }
}
