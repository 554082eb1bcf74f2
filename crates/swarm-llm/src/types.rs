//! Provider-neutral request and response types.
//!
//! Backends translate these into their own wire formats. A completion is a
//! single model turn; the tool-call loop lives with the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

impl From<swarm_types::Role> for ChatRole {
    fn from(role: swarm_types::Role) -> Self {
        match role {
            swarm_types::Role::System => ChatRole::System,
            swarm_types::Role::User => ChatRole::User,
            swarm_types::Role::Assistant => ChatRole::Assistant,
            swarm_types::Role::Tool => ChatRole::Tool,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Tool ID as advertised in the request (`kit__name`).
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One message of a conversation as sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    /// Calls made by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant(content)
        }
    }

    /// Tool output answering `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(ChatRole::Tool, content)
        }
    }
}

impl From<&swarm_types::Message> for ChatMessage {
    fn from(m: &swarm_types::Message) -> Self {
        match m.role {
            swarm_types::Role::Tool => ChatMessage::tool(m.sender.clone(), m.content.clone()),
            role => ChatMessage::new(role.into(), m.content.clone()),
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A single chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The concatenated system messages.
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Name of the tool a call ID refers to, from earlier assistant turns.
    pub fn tool_name_for(&self, call_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .find(|c| c.id == call_id)
            .map(|c| c.name.as_str())
    }
}

/// Why the model stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// Token accounting, when the provider reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// The model's reply for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub stop_reason: StopReason,
    #[serde(default)]
    pub usage: Usage,
}

impl CompletionResponse {
    /// Plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Reply requesting tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assistant message to append to the conversation.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::assistant_calls(self.content.clone(), self.tool_calls.clone())
    }
}

/// Image generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    /// `1024x1024`, `1792x1024` or `1024x1792`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    /// `standard` or `hd`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quality: String,
    /// `vivid` or `natural`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub style: String,
}

/// Generated image as base64 JSON payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub b64_json: String,
}

/// Text-to-speech request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    /// Voice guidance, typically the agent's instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub voice: String,
    /// Output container, e.g. `mp3` or `pcm`.
    #[serde(default)]
    pub format: String,
}

/// Synthesized audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechResponse {
    pub mime_type: String,
    pub audio: Vec<u8>,
}

/// MIME type for a speech output format.
pub fn audio_mime(format: &str) -> &'static str {
    match format {
        "mp3" => "audio/mpeg",
        "opus" => "audio/opus",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "pcm" => "audio/pcm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_text_and_tool_lookup() {
        let req = CompletionRequest::new(
            "m",
            vec![
                ChatMessage::system("a"),
                ChatMessage::system("b"),
                ChatMessage::user("q"),
                ChatMessage::assistant_calls(
                    "",
                    vec![ToolCall::new("c1", "sh__pwd", json!({}))],
                ),
                ChatMessage::tool("c1", "/tmp"),
            ],
        );
        assert_eq!(req.system_text().as_deref(), Some("a\nb"));
        assert_eq!(req.tool_name_for("c1"), Some("sh__pwd"));
        assert_eq!(req.tool_name_for("c2"), None);
    }

    #[test]
    fn test_from_swarm_message() {
        let m = swarm_types::Message::tool("call_9", "done");
        let chat = ChatMessage::from(&m);
        assert_eq!(chat.role, ChatRole::Tool);
        assert_eq!(chat.tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn test_audio_mime() {
        assert_eq!(audio_mime("mp3"), "audio/mpeg");
        assert_eq!(audio_mime("???"), "application/octet-stream");
    }
}
