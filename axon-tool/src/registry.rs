//! Tool trait and registry.

use axon_core::{ErrorKind, OwnerId};
use axon_store::Store;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from tool execution.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name exists in the registry.
    #[error("no tool named {0} is registered")]
    NotFound(String),

    /// The tool exists but the caller's role may not invoke it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The arguments the model supplied did not pass validation.
    #[error("arguments rejected: {0}")]
    InvalidInput(String),

    /// A downstream connector is unreachable. Non-fatal; the model is
    /// expected to fall back.
    #[error("connector unavailable: {0}")]
    ConnectorUnavailable(String),

    /// The tool ran and ended in an error.
    #[error("tool run ended in error: {0}")]
    ExecutionFailed(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ToolError {
    /// Classification carried on the tool reply and the failure event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::ToolNotFound,
            Self::PermissionDenied(_) => ErrorKind::ToolPermissionDenied,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ConnectorUnavailable(_) => ErrorKind::ConnectorUnavailable,
            Self::ExecutionFailed(_) | Self::Other(_) => ErrorKind::ToolExecutionError,
        }
    }
}

/// What a tool may touch while executing.
///
/// Carries the store handle (the session factory — a tool that needs a
/// database session acquires one from the pool inside its own call and
/// releases it before returning), the owner for scoped reads, and the
/// run's cancellation token. Tools observe cancellation cooperatively;
/// nothing interrupts them mid-flight.
#[derive(Clone)]
pub struct ToolContext {
    /// The acting owner. Store reads must be scoped to this owner.
    pub owner_id: OwnerId,
    /// Session factory. Never hold a connection across the call return.
    pub store: Store,
    /// Run-level cancellation, observed between units of work.
    pub cancel: CancellationToken,
}

/// Object-safe trait for tool implementations.
///
/// Any tool source (local function, subprocess wrapper, HTTP endpoint)
/// implements this trait. Tools are stored as `Arc<dyn ToolDyn>` in
/// [`ToolRegistry`].
pub trait ToolDyn: Send + Sync {
    /// The tool's unique name.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Per-tool timeout override. `None` uses the invoker default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool with the given input.
    fn call(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>;
}

/// Registry of tools available to a role.
///
/// Holds tools as `Arc<dyn ToolDyn>` keyed by name. Supervisors and
/// workers get distinct registries — the worker registry never contains
/// the spawn tool, so nesting is structurally impossible.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolDyn>>,
    allowlist: Option<Vec<String>>,
}

impl ToolRegistry {
    /// Create an empty registry with no allowlist restriction.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            allowlist: None,
        }
    }

    /// Restrict resolution to the named tools. Tools outside the list
    /// resolve as permission errors rather than unknown tools.
    pub fn with_allowlist(mut self, allowed: Vec<String>) -> Self {
        self.allowlist = Some(allowed);
        self
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolDyn>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Resolve a tool for invocation, distinguishing "unknown" from
    /// "known but not allowed for this role".
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn ToolDyn>, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_owned()))?;
        if let Some(allowed) = &self.allowlist {
            if !allowed.iter().any(|a| a == name) {
                return Err(ToolError::PermissionDenied(name.to_owned()));
            }
        }
        Ok(tool)
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolDyn>> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl ToolDyn for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn call(
            &self,
            input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
        {
            Box::pin(async move { Ok(json!({"echoed": input})) })
        }
    }

    #[test]
    fn tool_dyn_is_object_safe() {
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Arc<dyn ToolDyn>>();
    }

    #[test]
    fn resolve_distinguishes_unknown_from_denied() {
        let mut registry = ToolRegistry::new().with_allowlist(vec!["other".into()]);
        registry.register(Arc::new(EchoTool));

        match registry.resolve("missing") {
            Err(ToolError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
        match registry.resolve("echo") {
            Err(ToolError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[test]
    fn error_kinds_map_onto_the_closed_set() {
        assert_eq!(
            ToolError::NotFound("x".into()).kind(),
            axon_core::ErrorKind::ToolNotFound
        );
        assert_eq!(
            ToolError::ConnectorUnavailable("x".into()).kind(),
            axon_core::ErrorKind::ConnectorUnavailable
        );
        assert_eq!(
            ToolError::ExecutionFailed("x".into()).kind(),
            axon_core::ErrorKind::ToolExecutionError
        );
    }
}
