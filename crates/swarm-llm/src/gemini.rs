//! Google Gemini `generateContent` backend.
//!
//! Gemini function calls carry no call ID, so IDs are minted on the way in
//! and mapped back to function names from earlier assistant turns.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::backend::{BackendConfig, LlmBackend, check_status, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{ChatRole, CompletionRequest, CompletionResponse, StopReason, ToolCall, Usage};

/// Default Gemini API base URL.
pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    client: reqwest::Client,
    config: BackendConfig,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = config.http_client()?;
        let base_url = config.base_or(DEFAULT_GEMINI_BASE);
        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn to_wire(request: &CompletionRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        for m in &request.messages {
            let (role, parts) = match m.role {
                ChatRole::System => continue,
                ChatRole::User => ("user", vec![json!({"text": m.content})]),
                ChatRole::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(json!({"text": m.content}));
                    }
                    for call in &m.tool_calls {
                        parts.push(json!({
                            "functionCall": {"name": call.name, "args": call.arguments}
                        }));
                    }
                    ("model", parts)
                }
                ChatRole::Tool => {
                    let id = m.tool_call_id.as_deref().unwrap_or_default();
                    let name = request.tool_name_for(id).unwrap_or(id);
                    (
                        "user",
                        vec![json!({
                            "functionResponse": {
                                "name": name,
                                "response": {"content": m.content}
                            }
                        })],
                    )
                }
            };
            if parts.is_empty() {
                continue;
            }
            match contents.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(existing) = last["parts"].as_array_mut() {
                        existing.extend(parts);
                    }
                }
                _ => contents.push(json!({"role": role, "parts": parts})),
            }
        }

        let mut body = json!({ "contents": contents });
        if let Some(system) = request.system_text() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !request.tools.is_empty() {
            let decls: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": decls }]);
        }
        let mut generation = serde_json::Map::new();
        if let Some(max) = request.max_tokens {
            generation.insert("maxOutputTokens".into(), max.into());
        }
        if let Some(t) = request.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }

    fn from_wire(model: &str, resp: GenerateResponse) -> Result<CompletionResponse> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Backend("response has no candidates".to_string()))?;

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push(t);
            }
            if let Some(call) = part.function_call {
                let id = format!("call_{}", uuid::Uuid::new_v4().simple());
                tool_calls.push(ToolCall::new(id, call.name, call.args));
            }
        }

        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => StopReason::MaxTokens,
                Some("STOP") | None => StopReason::EndTurn,
                Some(_) => StopReason::Other,
            }
        };

        Ok(CompletionResponse {
            id: String::new(),
            model: model.to_string(),
            content: text.join(""),
            tool_calls,
            stop_reason,
            usage: resp
                .usage_metadata
                .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let key = self
            .config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Config("gemini requires an API key".to_string()))?;
        let body = Self::to_wire(&request);
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        debug!(model = %request.model, "Sending generateContent");

        let resp: GenerateResponse = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let resp = self
                    .client
                    .post(&url)
                    .header("x-goog-api-key", &key)
                    .json(&body)
                    .send()
                    .await?;
                Ok(check_status(resp).await?.json().await?)
            },
        )
        .await?;
        Self::from_wire(&request.model, resp)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn test_function_response_uses_call_name() {
        let req = CompletionRequest::new(
            "gemini-2.0-flash-lite",
            vec![
                ChatMessage::system("sys"),
                ChatMessage::user("hi"),
                ChatMessage::assistant_calls(
                    "",
                    vec![ToolCall::new("call_1", "sh__pwd", json!({}))],
                ),
                ChatMessage::tool("call_1", "/home"),
            ],
        );
        let wire = GeminiBackend::to_wire(&req);
        assert_eq!(wire["systemInstruction"]["parts"][0]["text"], "sys");
        let contents = wire["contents"].as_array().unwrap();
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["name"],
            "sh__pwd"
        );
    }

    #[test]
    fn test_from_wire_mints_ids() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "x", "args": {"a": 1}}}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        let out = GeminiBackend::from_wire("m", resp).unwrap();
        assert_eq!(out.stop_reason, StopReason::ToolUse);
        assert!(out.tool_calls[0].id.starts_with("call_"));
        assert_eq!(out.tool_calls[0].arguments["a"], 1);
    }
}
