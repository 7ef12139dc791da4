//! Test-only mock LLM provider.

use std::sync::{Arc, Mutex};

use crate::provider::{ChatStream, LlmProvider, Message};

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub embedding: Vec<f32>,
    pub supports_embeddings: bool,
    pub content_embeddings: bool,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            embedding: vec![0.0; 8],
            supports_embeddings: false,
            content_embeddings: false,
            fail_chat: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    /// Responses consumed in order; falls back to `default_response` when exhausted.
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    /// Deterministic embeddings derived from letter frequencies, so texts that
    /// share vocabulary land close together. Enables clustering and search tests
    /// without a real model.
    #[must_use]
    pub fn with_content_embeddings() -> Self {
        Self {
            supports_embeddings: true,
            content_embeddings: true,
            ..Self::default()
        }
    }

    /// Advertises embedding support but fails every `embed` call.
    #[must_use]
    pub fn failing_embeddings() -> Self {
        Self {
            supports_embeddings: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_fixed_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self.supports_embeddings = true;
        self
    }
}

/// Normalized letter-frequency vector (26 dims) plus a length feature.
#[must_use]
pub fn frequency_embedding(text: &str) -> Vec<f32> {
    let mut counts = [0.0f32; 27];
    let mut total = 0.0f32;
    for c in text.chars().filter(char::is_ascii_alphabetic) {
        let idx = (c.to_ascii_lowercase() as usize) - ('a' as usize);
        counts[idx] += 1.0;
        total += 1.0;
    }
    if total > 0.0 {
        for c in &mut counts[..26] {
            *c /= total;
        }
    }
    counts[26] = (text.len() as f32 / 1000.0).min(1.0);
    counts.to_vec()
}

impl LlmProvider for MockProvider {
    async fn chat(&self, _messages: &[Message]) -> Result<String, crate::LlmError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_chat {
            return Err(crate::LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, crate::LlmError> {
        let response = self.chat(messages).await?;
        Ok(Box::pin(tokio_stream::once(Ok(response))))
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::LlmError> {
        if self.fail_embed {
            return Err(crate::LlmError::Other("mock embed error".into()));
        }
        if !self.supports_embeddings {
            return Err(crate::LlmError::EmbedUnsupported { provider: "mock" });
        }
        if self.content_embeddings {
            Ok(frequency_embedding(text))
        } else {
            Ok(self.embedding.clone())
        }
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    fn name(&self) -> &str {
        "mock"
    }
}
