//! OpenAI-compatible HTTP backend (works with OpenAI, llama.cpp server, vLLM, LM Studio).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message, Role};
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: Option<String>,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        embedding_model: Option<String>,
        max_tokens: u32,
    ) -> Self {
        let timeout_secs = DEFAULT_TIMEOUT_SECS;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model,
            embedding_model,
            max_tokens,
            timeout_secs,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self.client = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs))
            .build()
            .unwrap_or_default();
        self
    }

    fn chat_body(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        let msgs: Vec<_> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();
        json!({
            "model": self.model,
            "messages": msgs,
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    fn map_send_error(&self, e: LlmError) -> LlmError {
        match e {
            LlmError::Http(inner) if inner.is_timeout() => LlmError::Timeout {
                seconds: self.timeout_secs,
            },
            other => other,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Extract the delta content from one SSE `data:` payload, if any.
fn delta_content(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_owned)
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.chat_body(messages, false);

        let response = send_with_retry("openai", MAX_RETRIES, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
        })
        .await
        .map_err(|e| self.map_send_error(e))?;

        let completion: ChatCompletion = response.error_for_status()?.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.is_empty())
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.chat_body(messages, true);

        let response = send_with_retry("openai", MAX_RETRIES, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
        })
        .await
        .map_err(|e| self.map_send_error(e))?
        .error_for_status()?;

        let bytes = response.bytes_stream();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, LlmError>>(32);

        tokio::spawn(async move {
            tokio::pin!(bytes);
            let mut buffer = String::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Http(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_owned();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    if let Some(content) = delta_content(payload)
                        && !content.is_empty()
                        && tx.send(Ok(content)).await.is_err()
                    {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let Some(model) = &self.embedding_model else {
            return Err(LlmError::EmbedUnsupported { provider: "openai" });
        };

        let url = format!("{}/embeddings", self.base_url);
        let body = json!({ "model": model, "input": text });

        let response = send_with_retry("openai", MAX_RETRIES, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
        })
        .await
        .map_err(|e| self.map_send_error(e))?;

        let parsed: EmbeddingResponse = response.error_for_status()?.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider(embedding_model: Option<String>) -> OpenAiProvider {
        OpenAiProvider::new(
            "http://127.0.0.1:1/v1/".into(),
            "key".into(),
            "gpt-4o-mini".into(),
            embedding_model,
            1024,
        )
    }

    #[test]
    fn trailing_slash_stripped_from_base_url() {
        let p = test_provider(None);
        assert_eq!(p.base_url, "http://127.0.0.1:1/v1");
    }

    #[test]
    fn supports_embeddings_requires_model() {
        assert!(!test_provider(None).supports_embeddings());
        assert!(test_provider(Some("text-embedding-3-small".into())).supports_embeddings());
    }

    #[test]
    fn chat_body_maps_roles() {
        let p = test_provider(None);
        let body = p.chat_body(
            &[Message::system("sys"), Message::user("hi")],
            false,
        );
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn delta_content_extracts_text() {
        let payload = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        assert_eq!(delta_content(payload).as_deref(), Some("hel"));
    }

    #[test]
    fn delta_content_handles_empty_delta() {
        let payload = r#"{"choices":[{"delta":{}}]}"#;
        assert!(delta_content(payload).is_none());
        assert!(delta_content("not json").is_none());
    }

    #[tokio::test]
    async fn embed_without_model_is_unsupported() {
        let p = test_provider(None);
        let result = p.embed("text").await;
        assert!(matches!(
            result,
            Err(LlmError::EmbedUnsupported { provider: "openai" })
        ));
    }
}
