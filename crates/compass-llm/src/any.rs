#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::openai::OpenAiProvider;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};
use crate::secret::Secret;

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given closure for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    OpenAi(OpenAiProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl LlmProvider for AnyProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        delegate_provider!(self, |p| p.chat(messages).await)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_provider!(self, |p| p.embed(text).await)
    }

    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }
}

/// Builds a provider bound to one caller's API key.
///
/// Keys are per user, so providers are created per build or question rather
/// than once at startup.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, api_key: &Secret) -> AnyProvider;
}

/// Factory for the OpenAI-compatible HTTP backend.
#[derive(Debug, Clone)]
pub struct OpenAiFactory {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    max_tokens: u32,
}

impl OpenAiFactory {
    #[must_use]
    pub fn new(base_url: String, model: String, embedding_model: String, max_tokens: u32) -> Self {
        Self {
            client: crate::http::default_client(),
            base_url,
            model,
            embedding_model,
            max_tokens,
        }
    }
}

impl ProviderFactory for OpenAiFactory {
    fn create(&self, api_key: &Secret) -> AnyProvider {
        AnyProvider::OpenAi(
            OpenAiProvider::new(
                api_key.clone(),
                self.base_url.clone(),
                self.model.clone(),
                self.embedding_model.clone(),
                self.max_tokens,
            )
            .with_client(self.client.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_factory_creates_openai_variant() {
        let factory = OpenAiFactory::new(
            "https://api.openai.com/v1".into(),
            "gpt-4o-mini".into(),
            "text-embedding-3-small".into(),
            512,
        );
        let provider = factory.create(&Secret::new("sk-test"));
        assert!(matches!(provider, AnyProvider::OpenAi(_)));
        assert_eq!(provider.name(), "openai");
    }
}
