//! OpenAI-compatible backend: chat completions, image generation and speech.
//!
//! Works against OpenAI or any service speaking the same API.

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::{BackendConfig, LlmBackend, check_status, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ImageRequest, ImageResponse,
    SpeechRequest, SpeechResponse, StopReason, ToolCall, Usage, audio_mime,
};

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    client: reqwest::Client,
    config: BackendConfig,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = config.http_client()?;
        let base_url = config.base_or(DEFAULT_OPENAI_BASE);
        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(header::CONTENT_TYPE, "application/json");
        match &self.config.api_key {
            Some(key) => builder.header(header::AUTHORIZATION, format!("Bearer {key}")),
            None => builder,
        }
    }

    fn to_wire(request: &CompletionRequest) -> ChatRequest {
        let messages = request.messages.iter().map(WireMessage::from).collect();
        let tools = request
            .tools
            .iter()
            .map(|t| WireTool {
                tool_type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect();
        ChatRequest {
            model: request.model.clone(),
            messages,
            tools,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn from_wire(resp: ChatResponse) -> Result<CompletionResponse> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Backend("response has no choices".to_string()))?;

        let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
        for call in choice.message.tool_calls {
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    LlmError::Serialization(format!(
                        "tool call {} has malformed arguments: {e}",
                        call.function.name
                    ))
                })?
            };
            tool_calls.push(ToolCall::new(call.id, call.function.name, arguments));
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("stop") | None => StopReason::EndTurn,
            Some(_) => StopReason::Other,
        };
        let usage = resp
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: resp.id,
            model: resp.model,
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            stop_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = Self::to_wire(&request);
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Sending chat completion"
        );
        let resp: ChatResponse = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let resp = check_status(self.post("/chat/completions").json(&body).send().await?)
                    .await?;
                Ok(resp.json().await?)
            },
        )
        .await?;
        Self::from_wire(resp)
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse> {
        let body = ImageWireRequest {
            model: request.model,
            prompt: request.prompt,
            n: 1,
            response_format: "b64_json",
            size: non_empty(request.size, "1024x1024"),
            quality: non_empty(request.quality, "standard"),
            style: non_empty(request.style, "natural"),
        };
        let resp: ImageWireResponse = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let resp =
                    check_status(self.post("/images/generations").json(&body).send().await?)
                        .await?;
                Ok(resp.json().await?)
            },
        )
        .await?;
        let b64_json = resp
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or_else(|| LlmError::Backend("image response has no data".to_string()))?;
        Ok(ImageResponse { b64_json })
    }

    async fn speech(&self, request: SpeechRequest) -> Result<SpeechResponse> {
        let format = non_empty(request.format, "mp3");
        let body = SpeechWireRequest {
            model: request.model,
            input: request.input,
            instructions: request.instructions.filter(|s| !s.is_empty()),
            voice: non_empty(request.voice, "alloy"),
            response_format: format.clone(),
        };
        let audio = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let resp =
                    check_status(self.post("/audio/speech").json(&body).send().await?).await?;
                Ok(resp.bytes().await?.to_vec())
            },
        )
        .await?;
        Ok(SpeechResponse {
            mime_type: audio_mime(&format).to_string(),
            audio,
        })
    }
}

fn non_empty(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        let tool_calls: Vec<WireToolCall> = m
            .tool_calls
            .iter()
            .map(|c| WireToolCall {
                id: c.id.clone(),
                call_type: "function".to_string(),
                function: WireFunctionCall {
                    name: c.name.clone(),
                    arguments: c.arguments.to_string(),
                },
            })
            .collect();
        let content = if m.role == ChatRole::Assistant
            && m.content.is_empty()
            && !tool_calls.is_empty()
        {
            None
        } else {
            Some(m.content.clone())
        };
        Self {
            role: m.role.as_str(),
            content,
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ImageWireRequest {
    model: String,
    prompt: String,
    n: u32,
    response_format: &'static str,
    size: String,
    quality: String,
    style: String,
}

#[derive(Debug, Deserialize)]
struct ImageWireResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechWireRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    voice: String,
    response_format: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_roles_and_tool_calls() {
        let req = CompletionRequest::new(
            "gpt",
            vec![
                ChatMessage::system("s"),
                ChatMessage::user("u"),
                ChatMessage::assistant_calls(
                    "",
                    vec![ToolCall::new("c1", "fs__read_file", json!({"path": "/a"}))],
                ),
                ChatMessage::tool("c1", "contents"),
            ],
        );
        let wire = serde_json::to_value(OpenAiBackend::to_wire(&req)).unwrap();
        let msgs = wire["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert!(msgs[2]["content"].is_null());
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["arguments"], r#"{"path":"/a"}"#);
        assert_eq!(msgs[3]["tool_call_id"], "c1");
        assert!(wire.get("tools").is_none());
    }

    #[test]
    fn test_from_wire_malformed_arguments() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"tool_calls": [{"id": "c", "type": "function",
                    "function": {"name": "x", "arguments": "{not json"}}]},
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let err = OpenAiBackend::from_wire(resp).unwrap_err();
        assert!(matches!(err, LlmError::Serialization(_)));
    }
}
