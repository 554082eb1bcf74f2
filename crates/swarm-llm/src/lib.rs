//! LLM provider backends for the swarm runtime.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  LlmBackend trait                         │
//! │  - complete()        one chat turn        │
//! │  - generate_image()  b64 JSON image       │
//! │  - speech()          audio bytes          │
//! └───────────────────────────────────────────┘
//!                      │
//!      ┌───────────────┼───────────────┐
//!      ▼               ▼               ▼
//!  ┌────────┐    ┌───────────┐    ┌────────┐
//!  │ OpenAI │    │ Anthropic │    │ Gemini │
//!  └────────┘    └───────────┘    └────────┘
//! ```
//!
//! Backends are built through a [`ProviderRegistry`] keyed by provider name.

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod registry;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use anthropic::AnthropicBackend;
pub use backend::{BackendConfig, LlmBackend, SharedBackend, with_retry};
pub use error::{LlmError, RateLimitInfo, Result};
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use registry::{BackendFactory, ProviderRegistry};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ImageRequest, ImageResponse,
    SpeechRequest, SpeechResponse, StopReason, ToolCall, ToolDefinition, Usage, audio_mime,
};

#[cfg(any(test, feature = "testing"))]
pub use mock::MockBackend;
