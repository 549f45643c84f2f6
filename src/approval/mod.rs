//! Pending dangerous commands and pending user questions.
//!
//! Both stores share the same shape: an id-keyed map with a TTL timer per
//! entry and single-shot consumption.  A dangerous command lives here from
//! the moment the classifier flags it until the user presses a button (or
//! five minutes pass); the originating agent turn has already moved on with
//! an `approval_required` tool error, so execution happens outside the ReAct
//! loop.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{ChatId, UserId};

// ─── PendingCommand ──────────────────────────────────────────────────────────

/// A dangerous command awaiting explicit user approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: String,
    /// Owning session (one session per user).
    pub session_id: UserId,
    /// Chat where the approval prompt was posted.
    pub chat_id: ChatId,
    pub command: String,
    /// Working directory the command will execute in if approved.
    pub cwd: String,
    /// Classifier reason shown on the prompt.
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

// ─── ApprovalQueue ───────────────────────────────────────────────────────────

/// Stores commands pending human approval; consume/cancel semantics bounded
/// by TTL.  Consumption is single-shot: approve-then-execute exactly once.
pub struct ApprovalQueue {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, PendingCommand>>>,
}

impl ApprovalQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Enqueue a command and start its expiry timer.  Returns the opaque id.
    pub fn store(
        &self,
        session_id: UserId,
        chat_id: ChatId,
        command: &str,
        cwd: &str,
        reason: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let pending = PendingCommand {
            id: id.clone(),
            session_id,
            chat_id,
            command: command.to_string(),
            cwd: cwd.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        };

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id.clone(), pending);
        }

        let entries = Arc::clone(&self.entries);
        let expire_id = id.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Ok(mut entries) = entries.lock()
                && entries.remove(&expire_id).is_some()
            {
                tracing::info!(id = %expire_id, "pending command expired unapproved");
            }
        });

        id
    }

    /// Single-shot consumption: after this returns `Some`, the id is gone.
    pub fn consume(&self, id: &str) -> Option<PendingCommand> {
        self.entries.lock().ok()?.remove(id)
    }

    /// Idempotent delete.  `true` if the entry existed.
    pub fn cancel(&self, id: &str) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Pending commands of one session, for `/pending` introspection.
    pub fn list_for_session(&self, session_id: UserId) -> Vec<PendingCommand> {
        self.entries
            .lock()
            .map(|e| {
                let mut list: Vec<PendingCommand> = e
                    .values()
                    .filter(|p| p.session_id == session_id)
                    .cloned()
                    .collect();
                list.sort_by_key(|p| p.created_at);
                list
            })
            .unwrap_or_default()
    }
}

// ─── QuestionBook ────────────────────────────────────────────────────────────

/// Pending `ask_user` questions.  The continuation is a oneshot sender; at
/// most one resolution wins, later answers are ignored.
pub struct QuestionBook {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, oneshot::Sender<String>>>>,
}

impl QuestionBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a question and return `(id, receiver)`.  The caller awaits
    /// the receiver with [`QuestionBook::ttl`]; the entry self-destructs
    /// after the TTL so an unanswered question cannot accumulate.
    pub fn ask(&self) -> (String, oneshot::Receiver<String>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id.clone(), tx);
        }

        let entries = Arc::clone(&self.entries);
        let expire_id = id.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Ok(mut entries) = entries.lock() {
                // Dropping the sender makes the receiver fail with a timeout.
                entries.remove(&expire_id);
            }
        });

        (id, rx)
    }

    /// Answer timeout used by callers awaiting the receiver.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deliver the chosen option.  `false` when the question is unknown,
    /// already answered, or expired.
    pub fn resolve(&self, id: &str, answer: &str) -> bool {
        let Some(tx) = self.entries.lock().ok().and_then(|mut e| e.remove(id)) else {
            return false;
        };
        tx.send(answer.to_string()).is_ok()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
