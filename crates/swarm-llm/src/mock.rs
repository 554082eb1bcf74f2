//! Scripted backend for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::LlmBackend;
use crate::error::{LlmError, Result};
use crate::types::{
    CompletionRequest, CompletionResponse, ImageRequest, ImageResponse, SpeechRequest,
    SpeechResponse,
};

/// Returns pre-configured responses in order and records every request.
///
/// With [`MockBackend::repeating`] the last response is replayed forever.
#[derive(Debug, Default)]
pub struct MockBackend {
    responses: Mutex<Vec<CompletionResponse>>,
    repeat: bool,
    images: Mutex<Vec<ImageResponse>>,
    request_log: Mutex<Vec<CompletionRequest>>,
    image_log: Mutex<Vec<ImageRequest>>,
    speech_log: Mutex<Vec<SpeechRequest>>,
}

impl MockBackend {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            ..Default::default()
        }
    }

    /// A single text reply.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![CompletionResponse::text(text)])
    }

    /// Replays `response` for every request.
    pub fn repeating(response: CompletionResponse) -> Self {
        Self {
            responses: Mutex::new(vec![response]),
            repeat: true,
            ..Default::default()
        }
    }

    pub fn with_image(self, b64_json: impl Into<String>) -> Self {
        self.images.lock().push(ImageResponse {
            b64_json: b64_json.into(),
        });
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        self.image_log.lock().clone()
    }

    pub fn speech_requests(&self) -> Vec<SpeechRequest> {
        self.speech_log.lock().clone()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.request_log.lock().push(request);

        let mut responses = self.responses.lock();
        match responses.len() {
            0 => Err(LlmError::Backend(
                "MockBackend: no more responses available".to_string(),
            )),
            1 if self.repeat => Ok(responses[0].clone()),
            _ => Ok(responses.remove(0)),
        }
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse> {
        self.image_log.lock().push(request);
        let mut images = self.images.lock();
        if images.is_empty() {
            return Err(LlmError::Backend("MockBackend: no image available".to_string()));
        }
        Ok(images.remove(0))
    }

    /// Echoes the input as bytes.
    async fn speech(&self, request: SpeechRequest) -> Result<SpeechResponse> {
        let audio = request.input.clone().into_bytes();
        self.speech_log.lock().push(request);
        Ok(SpeechResponse {
            mime_type: "audio/mpeg".to_string(),
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ToolCall};

    fn req(q: &str) -> CompletionRequest {
        CompletionRequest::new("m", vec![ChatMessage::user(q)])
    }

    #[tokio::test]
    async fn test_responses_in_order_then_exhausted() {
        let backend = MockBackend::new(vec![
            CompletionResponse::text("first"),
            CompletionResponse::text("second"),
        ]);
        assert_eq!(backend.complete(req("1")).await.unwrap().content, "first");
        assert_eq!(backend.complete(req("2")).await.unwrap().content, "second");
        assert!(backend.complete(req("3")).await.is_err());
        assert_eq!(backend.request_count(), 3);
        assert_eq!(backend.requests()[1].messages[0].content, "2");
    }

    #[tokio::test]
    async fn test_repeating() {
        let call = CompletionResponse::tool_calls(vec![ToolCall::new(
            "c",
            "sh__pwd",
            serde_json::json!({}),
        )]);
        let backend = MockBackend::repeating(call);
        for _ in 0..5 {
            assert!(backend.complete(req("x")).await.unwrap().has_tool_calls());
        }
    }

    #[tokio::test]
    async fn test_image_and_speech() {
        let backend = MockBackend::default().with_image("aGVsbG8=");
        let img = backend.generate_image(ImageRequest::default()).await.unwrap();
        assert_eq!(img.b64_json, "aGVsbG8=");
        let audio = backend
            .speech(SpeechRequest {
                input: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(audio.audio, b"hi");
    }
}
