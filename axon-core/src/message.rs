//! The thread message model — the conversational context a run reads
//! and appends.

use crate::id::{OwnerId, ThreadId, ToolCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a thread message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions installed by the platform.
    System,
    /// The owner's messages.
    User,
    /// Model output, possibly carrying tool calls.
    Assistant,
    /// A tool reply, keyed to its tool call.
    Tool,
}

impl ChatRole {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for ChatRole {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown chat role: {other}")),
        }
    }
}

/// One tool invocation requested by the model.
///
/// Persisted verbatim on the assistant message so that a thread reloaded
/// after interrupt/resume reconstructs the exact `tool_calls` list —
/// losing this metadata is the silent-no-op failure mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Model-issued identifier, echoed in the tool reply.
    pub id: ToolCallId,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments.
    pub args: serde_json::Value,
}

/// A persisted message in a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Row key.
    pub id: i64,
    /// The thread this message belongs to.
    pub thread_id: ThreadId,
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Tool calls carried by an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// For `tool` messages: the call this message replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    /// When the message entered the thread.
    pub sent_at: DateTime<Utc>,
    /// Orchestration-only messages are hidden from end-user views.
    #[serde(default)]
    pub internal: bool,
}

/// A message about to be appended to a thread.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Tool calls carried by an assistant message.
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// For `tool` messages: the call this message replies to.
    pub tool_call_id: Option<ToolCallId>,
    /// Hide from end-user views.
    pub internal: bool,
}

impl NewMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            internal: false,
        }
    }

    /// An assistant message, with any tool calls the model issued.
    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCallRequest>>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            internal: false,
        }
    }

    /// A tool reply keyed to the call it answers. Tool replies are
    /// orchestration plumbing, hidden from end-user views.
    pub fn tool_reply(tool_call_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
            internal: true,
        }
    }
}

/// A conversation thread header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Row key.
    pub id: ThreadId,
    /// The account that owns this thread. Listing APIs filter by owner.
    pub owner_id: OwnerId,
    /// Display title.
    pub title: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_preserves_tool_call_count_and_ids() {
        let calls: Vec<ToolCallRequest> = (0..3)
            .map(|i| ToolCallRequest {
                id: ToolCallId::new(format!("tc-{i}")),
                name: "spawn_worker".into(),
                args: json!({"task": format!("task {i}")}),
            })
            .collect();
        let msg = ThreadMessage {
            id: 1,
            thread_id: ThreadId::from(9),
            role: ChatRole::Assistant,
            content: String::new(),
            tool_calls: Some(calls.clone()),
            tool_call_id: None,
            sent_at: Utc::now(),
            internal: false,
        };

        let text = serde_json::to_string(&msg).unwrap();
        let back: ThreadMessage = serde_json::from_str(&text).unwrap();
        let back_calls = back.tool_calls.unwrap();
        assert_eq!(back_calls.len(), 3);
        for (a, b) in calls.iter().zip(back_calls.iter()) {
            assert_eq!(a.id, b.id);
        }
    }

    #[test]
    fn tool_reply_is_internal_and_keyed() {
        let msg = NewMessage::tool_reply(ToolCallId::new("tc-1"), "done");
        assert!(msg.internal);
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.unwrap().as_str(), "tc-1");
    }

    #[test]
    fn plain_message_omits_tool_fields_on_the_wire() {
        let msg = ThreadMessage {
            id: 1,
            thread_id: ThreadId::from(1),
            role: ChatRole::User,
            content: "hi".into(),
            tool_calls: None,
            tool_call_id: None,
            sent_at: Utc::now(),
            internal: false,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("tool_calls"));
        assert!(!text.contains("tool_call_id"));
    }
}
