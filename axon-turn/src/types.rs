//! Wire types for provider conversations.
//!
//! These are the engine's lingua franca — not thread-store rows, not
//! provider API shapes. Providers convert to and from these.

use axon_core::{ChatRole, ToolCallId, ToolCallRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A message in the provider conversation.
///
/// `tool_calls` is only populated on assistant messages; `tool_call_id`
/// only on tool replies. The engine builds these from the thread store
/// and from synthesized worker results on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    /// The role of the message author.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Tool calls issued by an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// For tool replies: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
}

impl ProviderMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A tool reply keyed to its call.
    pub fn tool_reply(tool_call_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }
}

/// JSON Schema description of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Short description the model reads.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: serde_json::Value,
}

/// Request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model identifier.
    pub model: String,
    /// Reasoning-effort hint. Providers pass this through only for
    /// models that advertise a reasoning capability; otherwise it is
    /// omitted from the upstream request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Conversation, system messages included.
    pub messages: Vec<ProviderMessage>,
    /// Available tools.
    pub tools: Vec<ToolSchema>,
    /// Maximum output tokens.
    pub max_tokens: Option<u32>,
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    pub completion_tokens: u64,
}

/// The assistant message a provider call produces.
///
/// Hard contract: if the backend streams tokens, the final message's
/// `tool_calls` list must survive streaming intact. A backend that can
/// lose it must disable streaming — a dropped list turns a spawn into a
/// silent no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Assistant text, possibly empty when only tool calls were issued.
    pub content: String,
    /// Tool calls, in the model's emission order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token accounting.
    pub usage: TokenUsage,
    /// The model that actually served the call.
    pub model: String,
    /// Cost in USD, when the provider can price the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Decimal>,
}

impl AssistantMessage {
    /// Whether this message ends the run (no tool calls to execute).
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}
