//! LLM adapters: translate one inference turn into a backend call.
//!
//! Adapters are keyed by the agent's `adapter` field; `chat` is the default.
//! New adapters are registered at startup on the [`AdapterRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use swarm_config::Model;
use swarm_llm::{
    ChatMessage, CompletionRequest, ImageRequest, SharedBackend, SpeechRequest, ToolCall,
    ToolDefinition, audio_mime,
};
use swarm_types::blob::MIME_B64_JSON;
use swarm_types::{ActionResult, ArgMap, ArgMapExt};
use tracing::debug;

use crate::error::{AgentError, Result};

const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// Everything an adapter sees of the current turn.
#[derive(Debug)]
pub struct Turn<'a> {
    pub agent: &'a str,
    pub model: Option<&'a Model>,
    pub instruction: &'a str,
    pub query: &'a str,
    /// Transcript: system, history, user, then any tool exchanges.
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub arguments: &'a ArgMap,
}

impl Turn<'_> {
    fn model_name(&self) -> Result<&str> {
        self.model
            .map(|m| m.model.as_str())
            .ok_or_else(|| AgentError::bad_request(format!("agent {} has no model", self.agent)))
    }
}

/// What the adapter produced.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Set by adapters whose output is not plain assistant text.
    pub result: Option<ActionResult>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`Adapter::call`] needs a backend.
    fn needs_model(&self) -> bool {
        true
    }

    async fn call(&self, backend: Option<SharedBackend>, turn: &Turn<'_>) -> Result<Reply>;
}

fn require(backend: Option<SharedBackend>, adapter: &str) -> Result<SharedBackend> {
    backend.ok_or_else(|| AgentError::internal(format!("{adapter} adapter called without a backend")))
}

/// Chat completion with tool calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatAdapter;

#[async_trait]
impl Adapter for ChatAdapter {
    fn name(&self) -> &str {
        "chat"
    }

    async fn call(&self, backend: Option<SharedBackend>, turn: &Turn<'_>) -> Result<Reply> {
        let backend = require(backend, self.name())?;
        let request = CompletionRequest::new(turn.model_name()?, turn.messages.to_vec())
            .with_tools(turn.tools.to_vec());
        let response = backend.complete(request).await?;
        debug!(
            agent = %turn.agent,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            tool_calls = response.tool_calls.len(),
            "Model turn"
        );
        Ok(Reply {
            content: response.content,
            tool_calls: response.tool_calls,
            result: None,
        })
    }
}

/// Image generation from the query.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageAdapter;

#[async_trait]
impl Adapter for ImageAdapter {
    fn name(&self) -> &str {
        "image"
    }

    async fn call(&self, backend: Option<SharedBackend>, turn: &Turn<'_>) -> Result<Reply> {
        let backend = require(backend, self.name())?;
        let prompt = if turn.instruction.is_empty() {
            turn.query.to_string()
        } else {
            format!("{}\n{}", turn.instruction, turn.query)
        };
        let request = ImageRequest {
            model: turn.model_name()?.to_string(),
            prompt,
            size: turn.arguments.string_or_empty("size"),
            quality: turn.arguments.string_or_empty("quality"),
            style: turn.arguments.string_or_empty("style"),
        };
        let image = backend.generate_image(request).await?;
        Ok(Reply {
            result: Some(ActionResult::typed(MIME_B64_JSON, image.b64_json)),
            ..Default::default()
        })
    }
}

/// Text to speech; the instruction guides the voice.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtsAdapter;

#[async_trait]
impl Adapter for TtsAdapter {
    fn name(&self) -> &str {
        "tts"
    }

    async fn call(&self, backend: Option<SharedBackend>, turn: &Turn<'_>) -> Result<Reply> {
        let backend = require(backend, self.name())?;
        let voice = turn.arguments.get_string("voice").filter(|v| !v.is_empty());
        let format = turn.arguments.get_string("format").filter(|f| !f.is_empty());
        let format = format.unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string());
        let request = SpeechRequest {
            model: turn.model_name()?.to_string(),
            input: turn.query.to_string(),
            instructions: Some(turn.instruction.to_string()).filter(|i| !i.is_empty()),
            voice: voice.unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            format: format.clone(),
        };
        let speech = backend.speech(request).await?;
        let mime = if speech.mime_type.is_empty() {
            audio_mime(&format).to_string()
        } else {
            speech.mime_type
        };
        Ok(Reply {
            result: Some(ActionResult::blob(mime, speech.audio)),
            ..Default::default()
        })
    }
}

/// Returns the query unchanged without calling a model.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAdapter;

#[async_trait]
impl Adapter for EchoAdapter {
    fn name(&self) -> &str {
        "echo"
    }

    fn needs_model(&self) -> bool {
        false
    }

    async fn call(&self, _backend: Option<SharedBackend>, turn: &Turn<'_>) -> Result<Reply> {
        Ok(Reply::text(turn.query))
    }
}

/// Adapters by name.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// `chat`, `image`, `tts` and `echo`.
    pub fn standard() -> Self {
        Self::empty()
            .with_adapter(Arc::new(ChatAdapter))
            .with_adapter(Arc::new(ImageAdapter))
            .with_adapter(Arc::new(TtsAdapter))
            .with_adapter(Arc::new(EchoAdapter))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(adapter.name().to_lowercase(), adapter);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Adapter>> {
        let key = if name.is_empty() { "chat".to_string() } else { name.to_lowercase() };
        self.adapters
            .get(&key)
            .cloned()
            .ok_or_else(|| AgentError::unsupported(format!("unknown adapter: {name}")))
    }
}
