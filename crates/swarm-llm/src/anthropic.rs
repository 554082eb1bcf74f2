//! Anthropic Messages API backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::backend::{BackendConfig, LlmBackend, check_status, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{
    ChatRole, CompletionRequest, CompletionResponse, StopReason, ToolCall, Usage,
};

/// Default Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com/v1";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Output budget when the request does not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicBackend {
    client: reqwest::Client,
    config: BackendConfig,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = config.http_client()?;
        let base_url = config.base_or(DEFAULT_ANTHROPIC_BASE);
        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Tool results travel as `tool_result` blocks inside user turns, and
    /// consecutive turns of the same role are merged.
    fn to_wire(request: &CompletionRequest) -> MessagesRequest {
        let mut messages: Vec<WireMessage> = Vec::new();
        for m in &request.messages {
            let (role, blocks) = match m.role {
                ChatRole::System => continue,
                ChatRole::User => ("user", vec![json!({"type": "text", "text": m.content})]),
                ChatRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !m.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": m.content}));
                    }
                    for call in &m.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    ("assistant", blocks)
                }
                ChatRole::Tool => (
                    "user",
                    vec![json!({
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                    })],
                ),
            };
            if blocks.is_empty() {
                continue;
            }
            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => messages.push(WireMessage {
                    role,
                    content: blocks,
                }),
            }
        }

        let tools = request
            .tools
            .iter()
            .map(|t| WireTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system_text(),
            messages,
            tools,
            temperature: request.temperature,
        }
    }

    fn from_wire(resp: MessagesResponse) -> CompletionResponse {
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                ResponseBlock::Text { text: t } => text.push(t),
                ResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input))
                }
                ResponseBlock::Other => {}
            }
        }
        let stop_reason = match resp.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("end_turn") | Some("stop_sequence") | None => StopReason::EndTurn,
            Some(_) => StopReason::Other,
        };
        CompletionResponse {
            id: resp.id,
            model: resp.model,
            content: text.join(""),
            tool_calls,
            stop_reason,
            usage: resp
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let key = self
            .config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Config("anthropic requires an API key".to_string()))?;
        let body = Self::to_wire(&request);
        debug!(model = %body.model, messages = body.messages.len(), "Sending messages request");

        let resp: MessagesResponse = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let resp = self
                    .client
                    .post(format!("{}/messages", self.base_url))
                    .header("x-api-key", &key)
                    .header("anthropic-version", API_VERSION)
                    .json(&body)
                    .send()
                    .await?;
                Ok(check_status(resp).await?.json().await?)
            },
        )
        .await?;
        Ok(Self::from_wire(resp))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn test_tool_results_merge_into_user_turn() {
        let req = CompletionRequest::new(
            "claude",
            vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("list"),
                ChatMessage::assistant_calls(
                    "checking",
                    vec![
                        ToolCall::new("t1", "sh__pwd", json!({})),
                        ToolCall::new("t2", "sh__workspace", json!({})),
                    ],
                ),
                ChatMessage::tool("t1", "/a"),
                ChatMessage::tool("t2", "/b"),
            ],
        );
        let wire = serde_json::to_value(AnthropicBackend::to_wire(&req)).unwrap();
        assert_eq!(wire["system"], "be brief");
        assert_eq!(wire["max_tokens"], DEFAULT_MAX_TOKENS);
        let msgs = wire["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["content"][1]["type"], "tool_use");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(msgs[2]["content"][1]["tool_use_id"], "t2");
    }

    #[test]
    fn test_from_wire() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "thinking", "thinking": "..."},
                {"type": "tool_use", "id": "tu_1", "name": "fs__read_file", "input": {"path": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 7}
        }))
        .unwrap();
        let out = AnthropicBackend::from_wire(resp);
        assert_eq!(out.content, "Let me look.");
        assert_eq!(out.stop_reason, StopReason::ToolUse);
        assert_eq!(out.tool_calls[0].arguments["path"], "x");
        assert_eq!(out.usage, Usage::new(5, 7));
    }
}
