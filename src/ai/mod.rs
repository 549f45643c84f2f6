pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiCompatProvider;
pub use provider::{ChatProvider, ProviderError};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, ToolCall, ToolSpec};
