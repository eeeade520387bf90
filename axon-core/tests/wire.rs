//! Wire-format acceptance tests for the core types.
//!
//! Tests cover:
//! - Event envelope serialization round-trips
//! - Assistant-message tool-call preservation through the thread store
//!   representation
//! - Status string stability (database and SSE depend on these)
//! - Error-kind strings matching the closed taxonomy

use axon_core::*;
use chrono::Utc;
use serde_json::json;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Round-trip laws
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn event_envelope_round_trips() {
    let event = RunEvent {
        event_id: EventId::from(42),
        run_public_id: RunPublicId::generate(),
        event_type: EventType::WorkerToolCompleted,
        timestamp: Utc::now(),
        payload: json!({
            "tool_call_id": "tc-1",
            "job_id": 7,
            "worker_id": "w-abc",
            "result_preview": "ok",
        }),
    };
    let wire = serde_json::to_string(&event).unwrap();
    let back: RunEvent = serde_json::from_str(&wire).unwrap();
    assert_eq!(back, event);
}

#[test]
fn timestamps_serialize_as_rfc3339_strings() {
    let event = RunEvent {
        event_id: EventId::from(1),
        run_public_id: RunPublicId::generate(),
        event_type: EventType::Heartbeat,
        timestamp: Utc::now(),
        payload: json!({}),
    };
    let value = serde_json::to_value(&event).unwrap();
    let raw = value["timestamp"].as_str().expect("timestamp is a string");
    assert!(raw.contains('T'));
    assert!(chrono::DateTime::parse_from_rfc3339(raw).is_ok());
}

#[test]
fn worker_result_round_trips_with_error_fields() {
    let result = WorkerResult {
        tool_call_id: ToolCallId::new("tc-b"),
        job_id: JobId::from(2),
        worker_id: Some(WorkerId::new("w-1")),
        status: BarrierJobStatus::Timeout,
        result: None,
        error_kind: Some(ErrorKind::WorkerTimeout),
        error: Some("deadline elapsed".into()),
    };
    let back: WorkerResult =
        serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
    assert_eq!(back, result);
}

#[test]
fn assistant_message_preserves_every_tool_call() {
    for k in [0usize, 1, 3, 8] {
        let calls: Vec<ToolCallRequest> = (0..k)
            .map(|i| ToolCallRequest {
                id: ToolCallId::new(format!("tc-{i}")),
                name: "spawn_worker".into(),
                args: json!({"task": i}),
            })
            .collect();
        let message = ThreadMessage {
            id: 1,
            thread_id: ThreadId::from(1),
            role: ChatRole::Assistant,
            content: String::new(),
            tool_calls: if calls.is_empty() {
                None
            } else {
                Some(calls.clone())
            },
            tool_call_id: None,
            sent_at: Utc::now(),
            internal: false,
        };
        let back: ThreadMessage =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        let back_calls = back.tool_calls.unwrap_or_default();
        assert_eq!(back_calls.len(), k);
        for (original, restored) in calls.iter().zip(back_calls.iter()) {
            assert_eq!(original.id, restored.id);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// String stability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn event_type_strings_are_the_published_taxonomy() {
    let expected = [
        "supervisor_started",
        "supervisor_iteration",
        "supervisor_tool_started",
        "supervisor_tool_completed",
        "supervisor_tool_failed",
        "worker_spawned",
        "worker_started",
        "worker_tool_started",
        "worker_tool_completed",
        "worker_tool_failed",
        "worker_complete",
        "worker_failed",
        "supervisor_interrupted",
        "supervisor_resumed",
        "supervisor_complete",
        "supervisor_failed",
        "heartbeat",
    ];
    for name in expected {
        let parsed = EventType::try_from(name.to_string())
            .unwrap_or_else(|_| panic!("{name} must parse"));
        assert_eq!(parsed.as_str(), name);
    }
}

#[test]
fn error_kind_strings_are_the_closed_set() {
    let expected = [
        (ErrorKind::InvalidInput, "invalid_input"),
        (ErrorKind::ToolTimeout, "tool_timeout"),
        (ErrorKind::ToolNotFound, "tool_not_found"),
        (ErrorKind::ToolPermissionDenied, "tool_permission_denied"),
        (ErrorKind::ToolExecutionError, "tool_execution_error"),
        (ErrorKind::ConnectorUnavailable, "connector_unavailable"),
        (ErrorKind::LlmTransportError, "llm_transport_error"),
        (ErrorKind::LlmInvalidResponse, "llm_invalid_response"),
        (ErrorKind::IterationLimit, "iteration_limit"),
        (ErrorKind::WorkerTimeout, "worker_timeout"),
        (ErrorKind::WorkerCrashed, "worker_crashed"),
        (ErrorKind::RetriesExhausted, "retries_exhausted"),
        (ErrorKind::Cancelled, "cancelled"),
        (ErrorKind::Internal, "internal"),
    ];
    for (kind, name) in expected {
        assert_eq!(kind.as_str(), name);
    }
}

#[test]
fn run_status_machine_matches_the_lifecycle() {
    use RunStatus::*;
    // queued -> running -> waiting -> running -> success
    assert!(Queued.can_transition_to(Running));
    assert!(Running.can_transition_to(Waiting));
    assert!(Waiting.can_transition_to(Running));
    assert!(Running.can_transition_to(Success));
    // no shortcut from waiting straight to success
    assert!(!Waiting.can_transition_to(Success));
    // terminal is terminal
    for terminal in [Success, Failed, Cancelled, Timeout] {
        for next in [Queued, Running, Waiting, Success, Failed, Cancelled, Timeout] {
            assert!(!terminal.can_transition_to(next));
        }
    }
}
