//! Chat-platform abstractions.
//!
//! The core is platform-agnostic: every outward action goes through the
//! [`ChatCallbacks`] trait object the chat layer injects at startup, and
//! every inbound event arrives as an [`InboundMessage`] or
//! [`CallbackAction`].  One trait per concern keeps the core trivially
//! fake-able in tests.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatId, MessageId, UserId};

// ─── Inbound types ───────────────────────────────────────────────────────────

/// Kind of chat a message arrived from.  Group context changes both access
/// denial (silent) and the command gate (dangerous collapses to blocked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
}

/// One delivered chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub message_id: MessageId,
    pub text: String,
    /// Caller's display name, injected into the prompt.
    pub display_name: String,
}

/// A button press arriving from the chat layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallbackAction {
    /// Execute a pending dangerous command.
    Approve {
        command_id: String,
        user_id: UserId,
    },
    /// Discard a pending dangerous command.
    Deny {
        command_id: String,
        user_id: UserId,
    },
    /// Answer a pending `ask_user` question.
    Answer {
        question_id: String,
        option: String,
    },
}

// ─── Send errors ─────────────────────────────────────────────────────────────

/// Failure modes of an outbound send.  The core tolerates all of them;
/// only throttling is retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// Blocked-by-user, chat-not-found, and other terminal platform errors.
    #[error("send failed: {0}")]
    Failed(String),
}

// ─── ChatCallbacks ───────────────────────────────────────────────────────────

/// Everything the core needs from the chat layer.  All operations are
/// failure-tolerant: a `false`/`None` return must never propagate as an
/// error into the agent.
#[async_trait]
pub trait ChatCallbacks: Send + Sync {
    async fn send_message(&self, chat_id: ChatId, text: &str)
    -> Result<Option<MessageId>, SendError>;

    async fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> bool;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> bool;

    async fn set_reaction(&self, chat_id: ChatId, message_id: MessageId, emoji: &str) -> bool;

    async fn send_file(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> bool;

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> bool;

    /// Render the two-button approval prompt for a pending command.
    async fn show_approval(
        &self,
        chat_id: ChatId,
        command_id: &str,
        command: &str,
        reason: &str,
    ) -> bool;

    /// Render an option keyboard for a pending `ask_user` question.
    async fn show_question(
        &self,
        chat_id: ChatId,
        question_id: &str,
        question: &str,
        options: &[String],
    ) -> bool;
}
