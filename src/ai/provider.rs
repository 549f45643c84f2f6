use async_trait::async_trait;
use thiserror::Error;

use super::types::{ChatRequest, ChatResponse};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned an error: {0}")]
    Api(String),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Trait for chat-completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Complete a conversation, optionally calling tools.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Default model identifier for this provider.
    fn model(&self) -> &str;

    /// Provider name for logging.
    fn provider_name(&self) -> &str;
}
