//! Provider abstraction for embeddings and chat completions.
//!
//! Compass treats model providers as two black boxes: `embed(text) -> vector`
//! and `chat(messages) -> text`. Providers are built per request from a
//! resolved API key through a [`ProviderFactory`](any::ProviderFactory).

pub mod any;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod secret;

pub use any::{AnyProvider, OpenAiFactory, ProviderFactory};
pub use error::LlmError;
pub use provider::{LlmProvider, Message, Role};
pub use secret::Secret;
