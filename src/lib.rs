pub mod agent;
pub mod ai;
pub mod approval;
pub mod channels;
pub mod config;
pub mod gate;
pub mod sandbox;
pub mod security;
pub mod tools;
pub mod workspace;

/// Convenience re-exports for the most commonly used traits and types across
/// the moatbot codebase.
///
/// ```rust
/// use moatbot::prelude::*;
/// ```
pub mod prelude {
    // AI provider trait
    pub use crate::ai::provider::ChatProvider;
    pub use crate::ai::types::{ChatMessage, ChatRequest, ChatResponse, Role, ToolCall};

    // Tool system
    pub use crate::tools::{Tool, ToolContext, ToolRegistry, ToolResult};

    // Security
    pub use crate::security::{
        AccessDecision, AccessStore, CommandGate, GateDecision, OutputSanitizer, PathGuard,
        PatternStore,
    };

    // Sandbox
    pub use crate::sandbox::{SandboxManager, runtime::ContainerRuntime};

    // Gates
    pub use crate::gate::{ConcurrencyGate, SendGate};

    // Channel abstraction
    pub use crate::channels::{ChatCallbacks, ChatKind, InboundMessage, Router};

    // Configuration
    pub use crate::config::{AppConfig, load_default_config};
}

/// Opaque chat-platform user identifier.
pub type UserId = i64;

/// Opaque chat identifier (private chats share the user's id on most platforms).
pub type ChatId = i64;

/// Opaque message identifier within a chat.
pub type MessageId = i32;
