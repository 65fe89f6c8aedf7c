//! Test-only mock provider and factory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::any::{AnyProvider, ProviderFactory};
use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};
use crate::secret::Secret;

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    chats: Arc<Mutex<Vec<Vec<Message>>>>,
    embed_calls: Arc<AtomicUsize>,
    pub default_response: String,
    pub embedding: Vec<f32>,
    /// Embedding requests whose text contains this marker fail.
    pub fail_embed_on: Option<String>,
    pub fail_embed: bool,
    pub fail_chat: bool,
    /// Milliseconds to sleep before answering an embedding request.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            chats: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            embedding: vec![0.1, 0.2, 0.3],
            fail_embed_on: None,
            fail_embed: false,
            fail_chat: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    #[must_use]
    pub fn failing_embed_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_embed_on = Some(marker.into());
        self
    }

    #[must_use]
    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    #[must_use]
    pub fn failing_chat(mut self) -> Self {
        self.fail_chat = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Every message list passed to `chat`, in call order.
    #[must_use]
    pub fn recorded_chats(&self) -> Vec<Vec<Message>> {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock chat error".into()));
        }
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_embed {
            return Err(LlmError::Other("mock embed error".into()));
        }
        if let Some(marker) = &self.fail_embed_on
            && text.contains(marker.as_str())
        {
            return Err(LlmError::Other(format!("mock embed error on {marker}")));
        }
        Ok(self.embedding.clone())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

/// Hands out clones of one `MockProvider` and records the keys it was asked for.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    pub provider: MockProvider,
    keys: Arc<Mutex<Vec<String>>>,
}

impl MockFactory {
    #[must_use]
    pub fn new(provider: MockProvider) -> Self {
        Self {
            provider,
            keys: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn used_keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProviderFactory for MockFactory {
    fn create(&self, api_key: &Secret) -> AnyProvider {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(api_key.expose().to_owned());
        AnyProvider::Mock(self.provider.clone())
    }
}
