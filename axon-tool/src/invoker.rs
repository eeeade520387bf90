//! The tool invoker — the single path every tool call takes.

use crate::registry::{ToolContext, ToolError, ToolRegistry};
use axon_artifact::ArtifactStore;
use axon_core::{EmitKind, EmitterRole, ErrorKind, ToolCallRequest};
use axon_log::Emitter;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Characters of a payload surfaced in events. The full result goes to
/// the artifact store, not the stream.
const PREVIEW_CHARS: usize = 240;

/// The outcome of one tool invocation. Never an error at the type
/// level: failures are classified and carried inside.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// The call this result answers.
    pub tool_call_id: axon_core::ToolCallId,
    /// Tool name, echoed for event payloads.
    pub name: String,
    /// Result text (or error description) for the tool reply message.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
    /// Classification when `is_error`.
    pub error_kind: Option<ErrorKind>,
}

/// Executes tool calls with attribution, timeouts, and artifact
/// persistence.
///
/// One invoker per role: the registry already encodes the caller's
/// allowlist. The emitter is injected per call site — the invoker holds
/// no identity of its own.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    artifacts: ArtifactStore,
    default_timeout: Duration,
}

impl ToolInvoker {
    /// Create an invoker over a role's registry.
    pub fn new(
        registry: Arc<ToolRegistry>,
        artifacts: ArtifactStore,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            artifacts,
            default_timeout,
        }
    }

    /// Invoke one tool call. Emits `tool_started` and exactly one of
    /// `tool_completed`/`tool_failed` through the injected emitter;
    /// exceptions never propagate past this function.
    pub async fn invoke(
        &self,
        call: &ToolCallRequest,
        emitter: &Emitter,
        ctx: &ToolContext,
    ) -> ToolResult {
        let started = emitter
            .emit(
                EmitKind::ToolStarted,
                json!({
                    "tool_call_id": call.id.as_str(),
                    "name": call.name,
                    "args_preview": preview(&call.args.to_string()),
                }),
            )
            .await;
        if let Err(error) = started {
            // Log append failed: the action must not proceed with state
            // the log does not show.
            return self.failed(call, ErrorKind::Internal, &error.to_string(), emitter, false)
                .await;
        }

        let outcome = match self.registry.resolve(&call.name) {
            Err(error) => Err(error),
            Ok(tool) => {
                let timeout = tool.timeout().unwrap_or(self.default_timeout);
                match tokio::time::timeout(timeout, tool.call(call.args.clone(), ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        return self
                            .failed(
                                call,
                                ErrorKind::ToolTimeout,
                                &format!("timed out after {}s", timeout.as_secs()),
                                emitter,
                                true,
                            )
                            .await;
                    }
                }
            }
        };

        match outcome {
            Ok(value) => {
                let content = match &value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let artifact = self
                    .artifacts
                    .put_tool_call(
                        &artifact_actor(emitter),
                        call.id.as_str(),
                        &json!({
                            "tool_call_id": call.id.as_str(),
                            "name": call.name,
                            "args": call.args,
                            "result": value,
                        }),
                    )
                    .await;
                let sha256 = match artifact {
                    Ok(reference) => Some(reference.sha256),
                    Err(error) => {
                        tracing::warn!(tool = %call.name, %error, "tool artifact write failed");
                        None
                    }
                };
                let _ = emitter
                    .emit(
                        EmitKind::ToolCompleted,
                        json!({
                            "tool_call_id": call.id.as_str(),
                            "name": call.name,
                            "result_preview": preview(&content),
                            "artifact_sha256": sha256,
                        }),
                    )
                    .await;
                ToolResult {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    content,
                    is_error: false,
                    error_kind: None,
                }
            }
            Err(error) => {
                let kind = error.kind();
                self.failed(call, kind, &error.to_string(), emitter, true)
                    .await
            }
        }
    }

    /// Invoke several calls concurrently. Each invocation opens its own
    /// sessions via the context's store handle; results come back in
    /// the original call order regardless of completion order.
    pub async fn invoke_many(
        &self,
        calls: &[ToolCallRequest],
        emitter: &Emitter,
        ctx: &ToolContext,
    ) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.invoke(call, emitter, ctx))).await
    }

    async fn failed(
        &self,
        call: &ToolCallRequest,
        kind: ErrorKind,
        error: &str,
        emitter: &Emitter,
        emit: bool,
    ) -> ToolResult {
        if emit {
            let _ = emitter
                .emit(
                    EmitKind::ToolFailed,
                    json!({
                        "tool_call_id": call.id.as_str(),
                        "name": call.name,
                        "error_kind": kind.as_str(),
                        "error": preview(error),
                    }),
                )
                .await;
        }
        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: format!("[{kind}] {error}"),
            is_error: true,
            error_kind: Some(kind),
        }
    }
}

/// The artifact directory for the emitting frame: the worker's id, or a
/// per-run supervisor directory.
fn artifact_actor(emitter: &Emitter) -> String {
    match emitter.role() {
        EmitterRole::Worker(worker_id) => worker_id.to_string(),
        EmitterRole::Supervisor => format!("supervisor-{}", emitter.run_public_id()),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_owned();
    }
    let cut: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}… [{} chars total]", text.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolDyn;
    use axon_core::{EventId, EventType, OwnerId, ToolCallId};
    use axon_log::EventLog;
    use axon_store::Store;
    use std::future::Future;
    use std::pin::Pin;
    use tokio_util::sync::CancellationToken;

    struct EchoTool;

    impl ToolDyn for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
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

    struct SlowTool;

    impl ToolDyn for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps past its timeout"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
        fn call(
            &self,
            _input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
        {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!({}))
            })
        }
    }

    async fn fixture(
        registry: ToolRegistry,
    ) -> (ToolInvoker, Emitter, ToolContext, Arc<EventLog>, axon_core::RunPublicId, tempfile::TempDir)
    {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();
        let run = store
            .create_run(&owner, thread.id, "test-model", None)
            .await
            .unwrap();
        let public_id = run.run_public_id().unwrap();
        let log = Arc::new(EventLog::new(store.clone()));
        let emitter = Emitter::supervisor(log.clone(), run.run_id(), public_id, owner.clone());
        let dir = tempfile::tempdir().unwrap();
        let invoker = ToolInvoker::new(
            Arc::new(registry),
            ArtifactStore::new(dir.path()),
            Duration::from_secs(60),
        );
        let ctx = ToolContext {
            owner_id: owner,
            store,
            cancel: CancellationToken::new(),
        };
        (invoker, emitter, ctx, log, public_id, dir)
    }

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: ToolCallId::new(id),
            name: name.into(),
            args: json!({"msg": "hi"}),
        }
    }

    #[tokio::test]
    async fn success_emits_started_then_completed() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let (invoker, emitter, ctx, log, public_id, _dir) = fixture(registry).await;

        let result = invoker.invoke(&call("tc-1", "echo"), &emitter, &ctx).await;
        assert!(!result.is_error);
        assert!(result.content.contains("echoed"));

        let events = log.replay(&public_id, EventId::from(0)).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::SupervisorToolStarted,
                EventType::SupervisorToolCompleted
            ]
        );
        assert_eq!(events[0].payload["tool_call_id"], "tc-1");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_classified_reply_not_a_panic() {
        let (invoker, emitter, ctx, log, public_id, _dir) = fixture(ToolRegistry::new()).await;
        let result = invoker.invoke(&call("tc-1", "bash"), &emitter, &ctx).await;
        assert!(result.is_error);
        assert_eq!(result.error_kind, Some(ErrorKind::ToolNotFound));
        assert!(result.content.contains("tool_not_found"));

        let events = log.replay(&public_id, EventId::from(0)).await.unwrap();
        assert_eq!(events[1].event_type, EventType::SupervisorToolFailed);
        assert_eq!(events[1].payload["error_kind"], "tool_not_found");
    }

    #[tokio::test]
    async fn per_tool_timeout_overrides_the_default() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let (invoker, emitter, ctx, _log, _public_id, _dir) = fixture(registry).await;

        let result = invoker.invoke(&call("tc-1", "slow"), &emitter, &ctx).await;
        assert!(result.is_error);
        assert_eq!(result.error_kind, Some(ErrorKind::ToolTimeout));
    }

    #[tokio::test]
    async fn concurrent_calls_return_in_call_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let (invoker, emitter, ctx, log, public_id, _dir) = fixture(registry).await;

        let calls = vec![call("tc-a", "echo"), call("tc-b", "missing"), call("tc-c", "echo")];
        let results = invoker.invoke_many(&calls, &emitter, &ctx).await;
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["tc-a", "tc-b", "tc-c"]);
        assert!(results[1].is_error);

        // started always precedes completed/failed for the same call id
        let events = log.replay(&public_id, EventId::from(0)).await.unwrap();
        for id in ["tc-a", "tc-b", "tc-c"] {
            let positions: Vec<_> = events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.payload["tool_call_id"] == id)
                .collect();
            assert_eq!(positions.len(), 2, "exactly one start and one finish for {id}");
            assert!(matches!(
                positions[0].1.event_type,
                EventType::SupervisorToolStarted
            ));
        }
    }

    #[tokio::test]
    async fn full_result_lands_in_the_artifact_store() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let (invoker, emitter, ctx, _log, public_id, dir) = fixture(registry).await;

        invoker.invoke(&call("tc-1", "echo"), &emitter, &ctx).await;
        let artifacts = ArtifactStore::new(dir.path());
        let stored = artifacts
            .get(&format!("supervisor-{public_id}"), "tool_calls/tc-1.json")
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(value["name"], "echo");
        assert_eq!(value["result"]["echoed"]["msg"], "hi");
    }
}
