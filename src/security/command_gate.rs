//! Command classifier: every shell command the agent emits passes through
//! here before it can touch the sandbox.
//!
//! Classification order is part of the contract:
//! 1. workspace-isolation violations — always blocked,
//! 2. the *blocked* list, walked to completion (first match wins),
//! 3. the *dangerous* list — approval-required in private chats, blocked in
//!    group chats (there is no single user to approve in a shared context).
//!
//! A command that matches both lists is therefore blocked, never prompted.

use std::{path::Path, sync::Arc};

use regex::Regex;

use crate::{
    UserId,
    channels::ChatKind,
    security::patterns::PatternStore,
};

// ─── GateDecision ────────────────────────────────────────────────────────────

/// Verdict for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Runs unconditionally through the sandbox.
    Allowed,
    /// Runs only after explicit user approval.
    NeedsApproval { reason: String },
    /// Never runs, never prompts.
    Blocked { reason: String },
}

// ─── CommandGate ─────────────────────────────────────────────────────────────

/// The classifier plus the workspace-isolation gate.
///
/// The isolation regexes depend only on the workspace root, so they are
/// compiled once at construction; the pattern lists come from the hot-
/// reloading [`PatternStore`] at every call.
pub struct CommandGate {
    patterns: Arc<PatternStore>,
    /// Matches `<root>/<digits>`; the capture is compared against the caller.
    other_workspace: Regex,
    /// Glob characters in the path component directly under `<root>`.
    root_glob: Regex,
    /// `<root>/_shared` (operator-only area).
    shared_area: Regex,
    /// Multi-level parent traversal.
    deep_traversal: Regex,
    /// Read tools whose first positional argument is `<root>` itself.
    list_root: Regex,
}

impl CommandGate {
    pub fn new(patterns: Arc<PatternStore>, workspace_root: &Path) -> Result<Self, String> {
        let root = regex::escape(workspace_root.to_string_lossy().trim_end_matches('/'));
        let build = |p: String| Regex::new(&p).map_err(|e| format!("gate pattern: {e}"));

        Ok(Self {
            patterns,
            other_workspace: build(format!(r"{root}/(\d+)"))?,
            root_glob: build(format!(r"{root}/[^/\s]*[*{{\[]"))?,
            shared_area: build(format!(r"{root}/_shared"))?,
            deep_traversal: build(r"\.\./\.\.".to_string())?,
            list_root: build(format!(
                r"(?:^|[;&|]\s*)(?:find|ls|cat|head|tail|grep|less|more|tree|du|wc)\s+(?:-\S+\s+)*{root}/?(?:\s|$|[;|&])"
            ))?,
        })
    }

    /// Classify `command` for the given user and chat context.
    pub fn classify(&self, command: &str, user_id: UserId, chat_kind: ChatKind) -> GateDecision {
        if let Some(reason) = self.workspace_violation(command, user_id) {
            return GateDecision::Blocked { reason };
        }

        let set = self.patterns.current();

        if let Some(reason) = set.first_blocked(command) {
            return GateDecision::Blocked {
                reason: reason.to_string(),
            };
        }

        if let Some(reason) = set.first_dangerous(command) {
            return match chat_kind {
                ChatKind::Private => GateDecision::NeedsApproval {
                    reason: reason.to_string(),
                },
                // Dangerous collapses to blocked in group chats.
                ChatKind::Group => GateDecision::Blocked {
                    reason: format!("{reason} (approval is not available in group chats)"),
                },
            };
        }

        GateDecision::Allowed
    }

    // ── Workspace isolation ──────────────────────────────────────────────

    fn workspace_violation(&self, command: &str, user_id: UserId) -> Option<String> {
        for caps in self.other_workspace.captures_iter(command) {
            // A digit run too large for an id cannot be this user's own
            // directory; treat it like any other foreign tenant.
            let owner = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<i64>().ok());
            if owner != Some(user_id) {
                return Some("Cannot access another user's workspace".to_string());
            }
        }
        if self.shared_area.is_match(command) {
            return Some("The _shared area is operator-only".to_string());
        }
        if self.root_glob.is_match(command) {
            return Some("Globbing across the workspace root is not allowed".to_string());
        }
        if self.deep_traversal.is_match(command) {
            return Some("Multi-level parent traversal escapes the workspace".to_string());
        }
        if self.list_root.is_match(command) {
            return Some("Listing the workspace root exposes other users".to_string());
        }
        None
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
