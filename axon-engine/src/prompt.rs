//! Prompt assembly: static content leads, the dynamic block trails.

use axon_core::{ThreadMessage, ToolCallRequest};
use axon_store::RunRow;
use axon_turn::types::ProviderMessage;
use chrono::Utc;

/// The static protocols preamble. Identical for every run so provider
/// prompt caches can match on the longest shared prefix.
pub(crate) const PROTOCOLS_PREAMBLE: &str = "\
You are the supervisor of a personal operations platform. You reason in \
iterations: each turn you may answer directly or call tools. To delegate \
work, call `spawn_worker` — one call per independent subtask; parallel \
calls run concurrently and their results return together in a single \
turn. Workers cannot spawn further workers. Tool failures come back as \
replies labelled with an error kind; recover, retry, or route around \
them rather than stopping. When a worker result is marked failed or \
timed out, decide explicitly whether to respawn it or continue with \
partial results.";

/// Stable per-run context. Constant across the run's iterations.
pub(crate) fn run_context(run: &RunRow) -> String {
    format!(
        "Run {public_id} for owner {owner}. Model: {model}.",
        public_id = run.public_id,
        owner = run.owner_id,
        model = run.model,
    )
}

/// The trailing dynamic block: wall clock plus freshly resolved
/// environment status. Kept last so it never invalidates the cached
/// static prefix.
pub(crate) fn dynamic_block(active_workers: usize) -> String {
    format!(
        "Current time: {now}. Active workers: {active_workers}.",
        now = Utc::now().to_rfc3339(),
    )
}

/// Map the persisted thread history into provider messages. Assistant
/// tool-call metadata survives verbatim — a reloaded thread must
/// reconstruct the exact `tool_calls` list.
pub(crate) fn history_messages(history: &[ThreadMessage]) -> Vec<ProviderMessage> {
    history
        .iter()
        .map(|message| ProviderMessage {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
        })
        .collect()
}

/// Assemble the full request message list for one iteration.
pub(crate) fn assemble(
    run: &RunRow,
    history: &[ThreadMessage],
    active_workers: usize,
) -> Vec<ProviderMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ProviderMessage::system(PROTOCOLS_PREAMBLE));
    messages.push(ProviderMessage::system(run_context(run)));
    messages.extend(history_messages(history));
    messages.push(ProviderMessage::system(dynamic_block(active_workers)));
    messages
}

/// Tool schemas the supervisor always sees, in addition to the
/// registry's own tools.
pub(crate) fn spawn_tool_schema() -> axon_turn::types::ToolSchema {
    axon_turn::types::ToolSchema {
        name: axon_tool::SPAWN_TOOL.into(),
        description: "Delegate a subtask to an ephemeral background worker. \
             Parallel calls in one turn run concurrently and return together."
            .into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "What the worker should do"},
                "mode": {
                    "type": "string",
                    "enum": ["standard", "workspace"],
                    "description": "standard: in-process tools; workspace: isolated git checkout"
                },
                "git_repo": {"type": "string", "description": "Repository URL (workspace mode)"},
                "branch": {"type": "string", "description": "Base branch (workspace mode)"},
                "priority": {"type": "integer", "description": "Higher claims first"}
            },
            "required": ["task"]
        }),
    }
}

/// Sort worker-result replies into the spawn order of their tool-call
/// ids as recorded on the interrupting assistant message, so the model
/// sees replies in the order it issued the calls.
pub(crate) fn order_replies(
    results: &mut Vec<axon_core::WorkerResult>,
    issued: &[ToolCallRequest],
) {
    let position = |id: &axon_core::ToolCallId| {
        issued
            .iter()
            .position(|call| &call.id == id)
            .unwrap_or(usize::MAX)
    };
    results.sort_by_key(|r| position(&r.tool_call_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::{ChatRole, RunStatus, ThreadId};

    fn run_row() -> RunRow {
        RunRow {
            id: 1,
            public_id: "00000000-0000-0000-0000-000000000001".into(),
            owner_id: "alice".into(),
            thread_id: 1,
            status: RunStatus::Running,
            model: "test-model".into(),
            reasoning_effort: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            iterations: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: "0".into(),
        }
    }

    #[test]
    fn static_content_leads_dynamic_trails() {
        let history = vec![ThreadMessage {
            id: 1,
            thread_id: ThreadId::from(1),
            role: ChatRole::User,
            content: "What is 2+2?".into(),
            tool_calls: None,
            tool_call_id: None,
            sent_at: Utc::now(),
            internal: false,
        }];
        let messages = assemble(&run_row(), &history, 2);
        assert_eq!(messages[0].content, PROTOCOLS_PREAMBLE);
        assert!(messages[1].content.contains("alice"));
        assert_eq!(messages[2].content, "What is 2+2?");
        assert!(messages.last().unwrap().content.contains("Active workers: 2"));
    }

    #[test]
    fn replies_follow_spawn_order() {
        use axon_core::{BarrierJobStatus, JobId, ToolCallId, WorkerResult};
        let issued = vec![
            ToolCallRequest {
                id: ToolCallId::new("tc-a"),
                name: "spawn_worker".into(),
                args: serde_json::json!({}),
            },
            ToolCallRequest {
                id: ToolCallId::new("tc-b"),
                name: "spawn_worker".into(),
                args: serde_json::json!({}),
            },
        ];
        let result = |id: &str| WorkerResult {
            tool_call_id: ToolCallId::new(id),
            job_id: JobId::from(1),
            worker_id: None,
            status: BarrierJobStatus::Completed,
            result: Some("ok".into()),
            error_kind: None,
            error: None,
        };
        let mut results = vec![result("tc-b"), result("tc-a")];
        order_replies(&mut results, &issued);
        assert_eq!(results[0].tool_call_id.as_str(), "tc-a");
    }
}
