//! Outbound send gate.
//!
//! All outbound chat messages pass through a single serialized channel so the
//! ordering of agent replies is total: the send mutex is held across the
//! platform call, and tokio's mutex is FIFO-fair, so two sends submitted in
//! order reach the platform in order.
//!
//! Pacing: a minimum global inter-send interval (5/s ceiling) plus a longer
//! minimum interval per group chat.  Platform throttle errors sleep for the
//! suggested retry interval plus a small buffer and re-attempt a fixed
//! number of times; all other errors are logged and swallowed — callers must
//! tolerate a `None` send result.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    ChatId, MessageId,
    channels::{ChatCallbacks, ChatKind, SendError},
    config::LimitsConfig,
};

/// Extra sleep on top of the platform-suggested retry interval.
const RETRY_BUFFER: Duration = Duration::from_millis(500);

// ─── SendGate ────────────────────────────────────────────────────────────────

pub struct SendGate {
    callbacks: Arc<dyn ChatCallbacks>,
    min_interval: Duration,
    group_interval: Duration,
    retries: u32,
    state: Mutex<SendState>,
}

#[derive(Default)]
struct SendState {
    last_send: Option<Instant>,
    last_group_send: HashMap<ChatId, Instant>,
}

impl SendGate {
    pub fn new(callbacks: Arc<dyn ChatCallbacks>, limits: &LimitsConfig) -> Self {
        Self {
            callbacks,
            min_interval: Duration::from_millis(limits.send_interval_ms),
            group_interval: Duration::from_secs(limits.group_interval_secs),
            retries: limits.send_retries,
            state: Mutex::new(SendState::default()),
        }
    }

    /// Send `text` to `chat_id`, honoring the pacing rules.
    ///
    /// Returns the platform message id, or `None` on a silent drop.
    pub async fn send(&self, chat_id: ChatId, chat_kind: ChatKind, text: &str) -> Option<MessageId> {
        // Acquire in strict FIFO across all tasks; held across the platform
        // call so outbound ordering is total.
        let mut state = self.state.lock().await;

        self.pace(&mut state, chat_id, chat_kind).await;

        let mut attempt = 0u32;
        loop {
            match self.callbacks.send_message(chat_id, text).await {
                Ok(message_id) => {
                    let now = Instant::now();
                    state.last_send = Some(now);
                    if chat_kind == ChatKind::Group {
                        state.last_group_send.insert(chat_id, now);
                    }
                    return message_id;
                }
                Err(SendError::RateLimited { retry_after }) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(chat_id, attempt, ?retry_after, "platform throttled send; backing off");
                    tokio::time::sleep(retry_after + RETRY_BUFFER).await;
                }
                Err(e) => {
                    tracing::warn!(chat_id, error = %e, "send dropped");
                    return None;
                }
            }
        }
    }

    async fn pace(&self, state: &mut SendState, chat_id: ChatId, chat_kind: ChatKind) {
        if let Some(last) = state.last_send {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        if chat_kind == ChatKind::Group
            && let Some(last) = state.last_group_send.get(&chat_id)
        {
            let elapsed = last.elapsed();
            if elapsed < self.group_interval {
                tokio::time::sleep(self.group_interval - elapsed).await;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
