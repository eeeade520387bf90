#![deny(missing_docs)]
//! Anthropic API provider for axon-turn.
//!
//! Implements the [`axon_turn::Provider`] trait for Anthropic's Messages
//! API. The engine's flat role/tool-call message model is converted to
//! the API's content-block shape on the way out and back.

mod types;

use axon_core::{ChatRole, ToolCallId, ToolCallRequest};
use axon_turn::provider::{Provider, ProviderError};
use axon_turn::types::{AssistantMessage, ProviderMessage, ProviderRequest, TokenUsage};
use rust_decimal::Decimal;
use types::*;

/// Models that accept an extended-thinking (reasoning) configuration.
const REASONING_MODEL_PREFIXES: &[&str] = &["claude-opus", "claude-sonnet"];

/// Anthropic API provider.
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
    api_url: String,
    api_version: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            api_url: "https://api.anthropic.com/v1/messages".into(),
            api_version: "2023-06-01".into(),
        }
    }

    /// Override the API URL (for testing or proxies).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Whether the model advertises a reasoning capability. The
    /// reasoning hint is omitted from the upstream request otherwise.
    fn supports_reasoning(model: &str) -> bool {
        REASONING_MODEL_PREFIXES
            .iter()
            .any(|p| model.starts_with(p))
    }

    fn build_request(&self, request: &ProviderRequest) -> AnthropicRequest {
        let max_tokens = request.max_tokens.unwrap_or(4096);

        // System-role messages collapse into the API's system field.
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n"))
        };

        let messages = to_anthropic_messages(&request.messages);

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        let thinking = match &request.reasoning_effort {
            Some(effort) if Self::supports_reasoning(&request.model) => {
                Some(AnthropicThinking {
                    kind: "enabled".into(),
                    budget_tokens: thinking_budget(effort),
                })
            }
            _ => None,
        };

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens,
            messages,
            system,
            tools,
            thinking,
        }
    }

    fn parse_response(
        &self,
        response: AnthropicResponse,
    ) -> Result<AssistantMessage, ProviderError> {
        if response.stop_reason == "max_tokens" {
            return Err(ProviderError::Unusable(
                "output truncated at max_tokens".into(),
            ));
        }

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                AnthropicContentBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&text);
                }
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest {
                        id: ToolCallId::new(id),
                        name,
                        args: input,
                    });
                }
                _ => {}
            }
        }

        let usage = TokenUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
        };

        // Sonnet-tier pricing: $3/MTok input, $15/MTok output.
        let input_cost = Decimal::from(response.usage.input_tokens) * Decimal::new(3, 6);
        let output_cost = Decimal::from(response.usage.output_tokens) * Decimal::new(15, 6);

        Ok(AssistantMessage {
            content,
            tool_calls,
            usage,
            model: response.model,
            cost: Some(input_cost + output_cost),
        })
    }
}

impl Provider for AnthropicProvider {
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl std::future::Future<Output = Result<AssistantMessage, ProviderError>> + Send {
        let api_request = self.build_request(&request);
        let http_request = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&api_request);

        async move {
            let http_response = http_request
                .send()
                .await
                .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

            let status = http_response.status();
            if !status.is_success() {
                let body = http_response.text().await.unwrap_or_default();
                return Err(match status {
                    reqwest::StatusCode::TOO_MANY_REQUESTS => ProviderError::Throttled,
                    reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                        ProviderError::CredentialsRejected(body)
                    }
                    other => ProviderError::Upstream {
                        status: other.as_u16(),
                        detail: body,
                    },
                });
            }

            let api_response: AnthropicResponse = http_response
                .json()
                .await
                .map_err(|e| ProviderError::Undecodable(e.to_string()))?;

            self.parse_response(api_response)
        }
    }
}

fn thinking_budget(effort: &str) -> u32 {
    match effort {
        "low" => 1024,
        "high" => 16384,
        _ => 4096,
    }
}

/// Convert the engine's flat message list to the API's alternating
/// user/assistant shape. Tool replies become `tool_result` blocks in a
/// user message; assistant tool calls become `tool_use` blocks.
fn to_anthropic_messages(messages: &[ProviderMessage]) -> Vec<AnthropicMessage> {
    let mut out: Vec<AnthropicMessage> = Vec::new();
    for message in messages {
        match message.role {
            ChatRole::System => {} // collapsed into the system field
            ChatRole::User => out.push(AnthropicMessage {
                role: "user".into(),
                content: AnthropicContent::Text(message.content.clone()),
            }),
            ChatRole::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(AnthropicContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                for call in message.tool_calls.iter().flatten() {
                    blocks.push(AnthropicContentBlock::ToolUse {
                        id: call.id.as_str().to_owned(),
                        name: call.name.clone(),
                        input: call.args.clone(),
                    });
                }
                out.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Blocks(blocks),
                });
            }
            ChatRole::Tool => {
                let block = AnthropicContentBlock::ToolResult {
                    tool_use_id: message
                        .tool_call_id
                        .as_ref()
                        .map(|id| id.as_str().to_owned())
                        .unwrap_or_default(),
                    content: message.content.clone(),
                    is_error: false,
                };
                // Consecutive tool replies share one user message.
                match out.last_mut() {
                    Some(AnthropicMessage {
                        role,
                        content: AnthropicContent::Blocks(blocks),
                    }) if role == "user" => blocks.push(block),
                    _ => out.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(vec![block]),
                    }),
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with(messages: Vec<ProviderMessage>) -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4-5".into(),
            reasoning_effort: None,
            messages,
            tools: vec![],
            max_tokens: Some(256),
        }
    }

    #[test]
    fn system_messages_collapse_into_system_field() {
        let provider = AnthropicProvider::new("test-key");
        let api = provider.build_request(&request_with(vec![
            ProviderMessage::system("Be helpful."),
            ProviderMessage::user("Hello"),
        ]));
        assert_eq!(api.system.as_deref(), Some("Be helpful."));
        assert_eq!(api.messages.len(), 1);
        assert_eq!(api.messages[0].role, "user");
    }

    #[test]
    fn tool_replies_group_into_one_user_message() {
        let provider = AnthropicProvider::new("test-key");
        let api = provider.build_request(&request_with(vec![
            ProviderMessage::user("go"),
            ProviderMessage {
                role: ChatRole::Assistant,
                content: String::new(),
                tool_calls: Some(vec![
                    ToolCallRequest {
                        id: ToolCallId::new("tc-1"),
                        name: "echo".into(),
                        args: json!({}),
                    },
                    ToolCallRequest {
                        id: ToolCallId::new("tc-2"),
                        name: "echo".into(),
                        args: json!({}),
                    },
                ]),
                tool_call_id: None,
            },
            ProviderMessage::tool_reply(ToolCallId::new("tc-1"), "one"),
            ProviderMessage::tool_reply(ToolCallId::new("tc-2"), "two"),
        ]));
        // user, assistant, one grouped tool-result user message
        assert_eq!(api.messages.len(), 3);
        match &api.messages[2].content {
            AnthropicContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn reasoning_hint_gated_on_model_capability() {
        let provider = AnthropicProvider::new("test-key");
        let mut req = request_with(vec![ProviderMessage::user("hi")]);
        req.reasoning_effort = Some("high".into());
        assert!(provider.build_request(&req).thinking.is_some());

        req.model = "claude-haiku-4-5".into();
        assert!(provider.build_request(&req).thinking.is_none());
    }

    #[test]
    fn truncated_response_is_an_error() {
        let provider = AnthropicProvider::new("test-key");
        let result = provider.parse_response(AnthropicResponse {
            content: vec![],
            model: "claude-sonnet-4-5".into(),
            stop_reason: "max_tokens".into(),
            usage: AnthropicUsage {
                input_tokens: 1,
                output_tokens: 1,
            },
        });
        assert!(matches!(result, Err(ProviderError::Unusable(_))));
    }

    #[test]
    fn parse_response_extracts_tool_calls() {
        let provider = AnthropicProvider::new("test-key");
        let msg = provider.parse_response(AnthropicResponse {
            content: vec![
                AnthropicContentBlock::Text {
                    text: "working on it".into(),
                },
                AnthropicContentBlock::ToolUse {
                    id: "tc-1".into(),
                    name: "spawn_worker".into(),
                    input: json!({"task": "df -h"}),
                },
            ],
            model: "claude-sonnet-4-5".into(),
            stop_reason: "tool_use".into(),
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        })
        .unwrap();
        assert_eq!(msg.content, "working on it");
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].id.as_str(), "tc-1");
        assert_eq!(msg.usage.prompt_tokens, 10);
        assert!(msg.cost.is_some());
    }
}
