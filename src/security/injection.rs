//! Prompt-injection scanner for inbound user messages.
//!
//! Runs before the LLM ever sees the text.  A hit produces a canned refusal
//! and the message is dropped; the user is **not** blocked — one false match
//! must never be terminal.  Matching is case-insensitive and covers English
//! and Russian phrasings (the pattern lists were learned from both).

use serde::{Deserialize, Serialize};

use crate::{UserId, security::patterns::PatternSet};

/// Result of scanning one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionScan {
    pub detected: bool,
    /// The text fragment that triggered the first matching pattern.
    pub matched: Option<String>,
}

/// Scan `text` against the injection list of the current pattern generation.
pub fn scan(patterns: &PatternSet, text: &str) -> InjectionScan {
    for regex in &patterns.injection {
        if let Some(m) = regex.find(text) {
            return InjectionScan {
                detected: true,
                matched: Some(m.as_str().to_string()),
            };
        }
    }
    InjectionScan {
        detected: false,
        matched: None,
    }
}

/// The canned refusal sent in place of an agent answer.
pub const REFUSAL: &str =
    "🛡 I can't process that message. If you think this is a mistake, rephrase and try again.";

/// Log a detection for the operator audit trail.
pub fn log_detection(user_id: UserId, scan: &InjectionScan) {
    if scan.detected {
        tracing::warn!(
            user_id,
            matched = scan.matched.as_deref().unwrap_or(""),
            "[INJECTION] message refused before reaching the model"
        );
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
