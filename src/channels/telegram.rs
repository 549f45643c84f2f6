//! Telegram channel driver.
//!
//! Requires the `channels-telegram` Cargo feature:
//!
//! ```sh
//! cargo build --features channels-telegram
//! ```
//!
//! # Architecture
//!
//! ```text
//!  Telegram Bot API ──(long-poll)──▶ TelegramChannel::listen()
//!                                          │
//!                          InboundMessage / CallbackAction
//!                                          │
//!                                       Router
//! ```
//!
//! The channel implements [`ChatCallbacks`], so the core never sees a
//! Telegram type.  Messages are sent as plain text and split at the
//! 4096-char Bot API limit; connection loss retries with exponential
//! back-off (1 s → 2 s → … → max 60 s).

use std::time::Duration;

use super::traits::CallbackAction;
use crate::UserId;

// ─── TelegramChannel ─────────────────────────────────────────────────────────

pub struct TelegramChannel {
    token: String,
    polling_timeout_secs: u32,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, polling_timeout_secs: u32) -> Self {
        Self {
            token: token.into(),
            polling_timeout_secs,
        }
    }

    // ─── Pure helpers (also used in tests) ───────────────────────────────

    /// Split `text` into chunks of at most 4096 characters (Telegram's
    /// limit).
    ///
    /// Split preference order: paragraph boundary, newline, sentence
    /// boundary, word boundary, hard cut.
    pub fn split_message(text: &str) -> Vec<String> {
        const MAX: usize = 4096;

        if text.len() <= MAX {
            return vec![text.to_string()];
        }

        let mut parts = Vec::new();
        let mut remaining = text;

        while remaining.len() > MAX {
            let mut cut = MAX;
            while !remaining.is_char_boundary(cut) {
                cut -= 1;
            }
            let chunk = &remaining[..cut];

            let split_at = Self::find_split(chunk, "\n\n")
                .or_else(|| Self::find_split(chunk, "\n"))
                .or_else(|| Self::find_split(chunk, ". "))
                .or_else(|| Self::find_split(chunk, " "))
                .unwrap_or(cut);

            parts.push(remaining[..split_at].to_string());
            remaining = remaining[split_at..].trim_start();
        }

        if !remaining.is_empty() {
            parts.push(remaining.to_string());
        }

        parts
    }

    fn find_split(chunk: &str, delimiter: &str) -> Option<usize> {
        chunk.rfind(delimiter).map(|i| i + delimiter.len())
    }

    /// Decode inline-button callback data into a [`CallbackAction`].
    ///
    /// Formats: `approve:<id>`, `deny:<id>`, `answer:<id>:<option>`.  The
    /// option text rides in the callback payload (Bot API caps it at 64
    /// bytes, which is why `ask_user` options are kept short).
    pub fn parse_callback_data(data: &str, presser: UserId) -> Option<CallbackAction> {
        let mut parts = data.splitn(3, ':');
        match (parts.next()?, parts.next()) {
            ("approve", Some(id)) => Some(CallbackAction::Approve {
                command_id: id.to_string(),
                user_id: presser,
            }),
            ("deny", Some(id)) => Some(CallbackAction::Deny {
                command_id: id.to_string(),
                user_id: presser,
            }),
            ("answer", Some(id)) => Some(CallbackAction::Answer {
                question_id: id.to_string(),
                option: parts.next()?.to_string(),
            }),
            _ => None,
        }
    }

    /// Exponential reconnect back-off: `min(2^attempt, 60)` seconds.
    pub fn reconnect_backoff(attempt: u32) -> Duration {
        let secs = (1u64 << attempt.min(63)).min(60);
        Duration::from_secs(secs)
    }
}

// ─── Bot API integration (channels-telegram only) ────────────────────────────

#[cfg(feature = "channels-telegram")]
mod api {
    use std::{path::Path, sync::Arc};

    use async_trait::async_trait;
    use teloxide::{
        payloads::setters::*,
        prelude::*,
        types::{
            InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ReactionType, UpdateKind,
        },
    };

    use super::TelegramChannel;
    use crate::{
        ChatId as CoreChatId, MessageId as CoreMessageId, UserId,
        channels::{
            ChatCallbacks, ChatKind, InboundMessage, Router, SendError,
        },
    };

    impl TelegramChannel {
        fn bot(&self) -> Bot {
            Bot::new(&self.token)
        }

        /// Long-poll for updates and dispatch them into `router`.  Each
        /// message is handled in its own task so one slow agent turn never
        /// stalls the poll loop; ordering per user is preserved by the
        /// router's per-user serialization.
        pub async fn listen(self: Arc<Self>, router: Arc<Router>) {
            let bot = self.bot();
            let mut attempt = 0u32;
            let mut offset: i32 = 0;

            loop {
                let result = bot
                    .get_updates()
                    .offset(offset)
                    .timeout(self.polling_timeout_secs)
                    .await;

                match result {
                    Ok(updates) => {
                        attempt = 0;
                        for update in updates {
                            offset = (update.id.0 as i32).saturating_add(1);
                            match update.kind {
                                UpdateKind::Message(message) => {
                                    if let Some(inbound) = Self::to_inbound(&message) {
                                        let router = Arc::clone(&router);
                                        tokio::spawn(async move {
                                            router.handle_message(inbound).await;
                                        });
                                    }
                                }
                                UpdateKind::CallbackQuery(query) => {
                                    let _ = bot.answer_callback_query(query.id.clone()).await;
                                    let presser = query.from.id.0 as UserId;
                                    if let Some(action) = query
                                        .data
                                        .as_deref()
                                        .and_then(|d| Self::parse_callback_data(d, presser))
                                    {
                                        let router = Arc::clone(&router);
                                        tokio::spawn(async move {
                                            router.handle_callback(action).await;
                                        });
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "telegram polling error; backing off");
                        let backoff = Self::reconnect_backoff(attempt);
                        attempt = attempt.saturating_add(1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        fn to_inbound(message: &teloxide::types::Message) -> Option<InboundMessage> {
            let from = message.from.as_ref()?;
            if from.is_bot {
                return None;
            }
            let text = message.text()?.to_string();
            let chat_kind = if message.chat.is_private() {
                ChatKind::Private
            } else {
                ChatKind::Group
            };
            Some(InboundMessage {
                user_id: from.id.0 as UserId,
                chat_id: message.chat.id.0,
                chat_kind,
                message_id: message.id.0,
                text,
                display_name: from.first_name.clone(),
            })
        }
    }

    #[async_trait]
    impl ChatCallbacks for TelegramChannel {
        async fn send_message(
            &self,
            chat_id: CoreChatId,
            text: &str,
        ) -> Result<Option<CoreMessageId>, SendError> {
            let bot = self.bot();
            let mut last_id = None;
            for part in Self::split_message(text) {
                match bot.send_message(ChatId(chat_id), part).await {
                    Ok(message) => last_id = Some(message.id.0),
                    Err(teloxide::RequestError::RetryAfter(seconds)) => {
                        return Err(SendError::RateLimited {
                            retry_after: seconds.duration(),
                        });
                    }
                    Err(e) => return Err(SendError::Failed(e.to_string())),
                }
            }
            Ok(last_id)
        }

        async fn edit_message(
            &self,
            chat_id: CoreChatId,
            message_id: CoreMessageId,
            text: &str,
        ) -> bool {
            self.bot()
                .edit_message_text(
                    ChatId(chat_id),
                    teloxide::types::MessageId(message_id),
                    text,
                )
                .await
                .is_ok()
        }

        async fn delete_message(&self, chat_id: CoreChatId, message_id: CoreMessageId) -> bool {
            self.bot()
                .delete_message(ChatId(chat_id), teloxide::types::MessageId(message_id))
                .await
                .is_ok()
        }

        async fn set_reaction(
            &self,
            chat_id: CoreChatId,
            message_id: CoreMessageId,
            emoji: &str,
        ) -> bool {
            self.bot()
                .set_message_reaction(ChatId(chat_id), teloxide::types::MessageId(message_id))
                .reaction(vec![ReactionType::Emoji {
                    emoji: emoji.to_string(),
                }])
                .await
                .is_ok()
        }

        async fn send_file(
            &self,
            chat_id: CoreChatId,
            path: &Path,
            caption: Option<&str>,
        ) -> bool {
            let request = self
                .bot()
                .send_document(ChatId(chat_id), InputFile::file(path.to_path_buf()));
            let request = match caption {
                Some(c) => request.caption(c.to_string()),
                None => request,
            };
            request.await.is_ok()
        }

        async fn send_direct_message(&self, user_id: UserId, text: &str) -> bool {
            // Private chats share the user's id on Telegram.
            self.send_message(user_id, text).await.is_ok()
        }

        async fn show_approval(
            &self,
            chat_id: CoreChatId,
            command_id: &str,
            command: &str,
            reason: &str,
        ) -> bool {
            let keyboard = InlineKeyboardMarkup::new([[
                InlineKeyboardButton::callback("✅ Execute", format!("approve:{command_id}")),
                InlineKeyboardButton::callback("❌ Deny", format!("deny:{command_id}")),
            ]]);
            self.bot()
                .send_message(
                    ChatId(chat_id),
                    format!("⚠️ The agent wants to run:\n{command}\n\nWhy flagged: {reason}"),
                )
                .reply_markup(keyboard)
                .await
                .is_ok()
        }

        async fn show_question(
            &self,
            chat_id: CoreChatId,
            question_id: &str,
            question: &str,
            options: &[String],
        ) -> bool {
            let rows: Vec<Vec<InlineKeyboardButton>> = options
                .iter()
                .map(|option| {
                    vec![InlineKeyboardButton::callback(
                        option.clone(),
                        format!("answer:{question_id}:{option}"),
                    )]
                })
                .collect();
            self.bot()
                .send_message(ChatId(chat_id), question.to_string())
                .reply_markup(InlineKeyboardMarkup::new(rows))
                .await
                .is_ok()
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
