//! Serializing wrapper for backends that cannot run concurrent generations.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message};

/// Wraps a provider so at most one generation is in flight at a time.
///
/// Local inference backends share mutable generation state in the loaded model;
/// concurrent calls queue on an async mutex instead of interleaving.
#[derive(Debug)]
pub struct ExclusiveProvider<P> {
    inner: Arc<P>,
    gate: Arc<Mutex<()>>,
}

impl<P> Clone for ExclusiveProvider<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<P: LlmProvider> ExclusiveProvider<P> {
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner: Arc::new(inner),
            gate: Arc::new(Mutex::new(())),
        }
    }
}

impl<P: LlmProvider> LlmProvider for ExclusiveProvider<P> {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let _guard = self.gate.lock().await;
        self.inner.chat(messages).await
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        // Holds the gate only for stream setup; local backends buffer the rest.
        let _guard = self.gate.lock().await;
        self.inner.chat_stream(messages).await
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let _guard = self.gate.lock().await;
        self.inner.embed(text).await
    }

    fn supports_embeddings(&self) -> bool {
        self.inner.supports_embeddings()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[tokio::test]
    async fn delegates_chat() {
        let provider = ExclusiveProvider::new(MockProvider::with_responses(vec!["hi".into()]));
        assert_eq!(provider.chat(&[Message::user("q")]).await.unwrap(), "hi");
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn concurrent_chats_both_complete() {
        let provider = ExclusiveProvider::new(
            MockProvider::with_responses(vec!["a".into(), "b".into()]).with_delay(10),
        );
        let p1 = provider.clone();
        let p2 = provider.clone();

        let m1 = [Message::user("1")];
        let m2 = [Message::user("2")];
        let (r1, r2) = tokio::join!(p1.chat(&m1), p2.chat(&m2));

        let mut got = vec![r1.unwrap(), r2.unwrap()];
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
    }
}
