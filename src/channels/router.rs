//! Inbound message dispatch.
//!
//! Per message: access policy → operator commands → injection scan →
//! admission → per-user serialization → agent turn → rate-limited send.
//! Button callbacks (approval, deny, question answers) arrive separately
//! and never re-enter the originating ReAct turn.

use std::sync::Arc;

use crate::{
    UserId,
    agent::AgentLoop,
    approval::{ApprovalQueue, QuestionBook},
    config::AccessMode,
    gate::{Admission, ConcurrencyGate, SendGate},
    security::{AccessDecision, AccessStore, INJECTION_REFUSAL, PatternStore, injection},
    tools::{ExecTool, ToolContext},
    workspace::WorkspaceManager,
};

use super::traits::{CallbackAction, ChatCallbacks, ChatKind, InboundMessage};

/// Reply for a private-chat access denial.
pub const ACCESS_DENIED: &str = "🚫 Access denied";

/// Transient reply when the global admission cap is reached.
pub const SERVER_BUSY: &str = "⏳ I'm at capacity right now — please try again in a minute.";

// ─── BotCommand ──────────────────────────────────────────────────────────────

/// Recognised operator commands.
#[derive(Debug, Clone, PartialEq)]
pub enum BotCommand {
    Start,
    Help,
    Status,
    Pending,
    Reset,
    /// Admin: add a user to the allowlist.
    Allow(UserId),
    /// Admin: remove a user from the allowlist.
    Deny(UserId),
    /// Admin: switch the access mode.
    Mode(AccessMode),
    Unknown(String),
}

/// Parse a bot command from message text.  `None` when the text is not a
/// command (does not start with `/`).
pub fn parse_bot_command(text: &str) -> Option<BotCommand> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let raw = text.trim_start_matches('/');
    let cmd = raw
        .split_once(|c: char| c == ' ' || c == '@')
        .map(|(c, _)| c)
        .unwrap_or(raw);
    let arg = raw.split_once(' ').map(|(_, a)| a.trim()).unwrap_or("");

    match cmd.to_lowercase().as_str() {
        "start" => Some(BotCommand::Start),
        "help" => Some(BotCommand::Help),
        "status" => Some(BotCommand::Status),
        "pending" => Some(BotCommand::Pending),
        "reset" => Some(BotCommand::Reset),
        "allow" => arg.parse().ok().map(BotCommand::Allow),
        "deny" => arg.parse().ok().map(BotCommand::Deny),
        "mode" => match arg {
            "admin_only" => Some(BotCommand::Mode(AccessMode::AdminOnly)),
            "allowlist" => Some(BotCommand::Mode(AccessMode::Allowlist)),
            "public" => Some(BotCommand::Mode(AccessMode::Public)),
            _ => None,
        },
        other => Some(BotCommand::Unknown(other.to_string())),
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

pub struct Router {
    pub access: Arc<AccessStore>,
    pub patterns: Arc<PatternStore>,
    pub admission: Arc<ConcurrencyGate>,
    pub send_gate: Arc<SendGate>,
    pub agent: Arc<AgentLoop>,
    pub approvals: Arc<ApprovalQueue>,
    pub questions: Arc<QuestionBook>,
    pub sessions: Arc<crate::agent::SessionStore>,
    pub sandbox: Arc<crate::sandbox::SandboxManager>,
    pub workspaces: Arc<WorkspaceManager>,
    pub exec: Arc<ExecTool>,
    pub callbacks: Arc<dyn ChatCallbacks>,
}

impl Router {
    /// Handle one delivered chat message end to end.
    pub async fn handle_message(&self, msg: InboundMessage) {
        // 1. Access policy, before anything else.
        match self.access.check(msg.user_id, msg.chat_kind) {
            AccessDecision::Permit => {}
            AccessDecision::DenySilent => return,
            AccessDecision::DenyMessage => {
                self.send_gate
                    .send(msg.chat_id, msg.chat_kind, ACCESS_DENIED)
                    .await;
                return;
            }
        }

        // 2. Operator commands bypass the agent.
        if let Some(command) = parse_bot_command(&msg.text) {
            let reply = self.run_command(&msg, command).await;
            self.send_gate.send(msg.chat_id, msg.chat_kind, &reply).await;
            return;
        }

        // 3. Injection scan; a hit never reaches the model.
        let scan = injection::scan(&self.patterns.current(), &msg.text);
        if scan.detected {
            injection::log_detection(msg.user_id, &scan);
            self.workspaces
                .log_activity(msg.user_id, "injection", &msg.text);
            self.send_gate
                .send(msg.chat_id, msg.chat_kind, INJECTION_REFUSAL)
                .await;
            return;
        }

        // 4. Global admission.
        let _permit = match self.admission.admit(msg.user_id) {
            Admission::Admitted(permit) => permit,
            Admission::Busy => {
                self.callbacks
                    .set_reaction(msg.chat_id, msg.message_id, "⏳")
                    .await;
                self.send_gate
                    .send(msg.chat_id, msg.chat_kind, SERVER_BUSY)
                    .await;
                return;
            }
        };

        // 5. Per-user serialization: the earlier message's full turn
        // completes before this one begins.
        let _turn = self.admission.acquire_user(msg.user_id).await;

        let workspace = match self.workspaces.user_dir(msg.user_id) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(user_id = msg.user_id, error = %e, "workspace creation failed");
                return;
            }
        };
        self.workspaces
            .log_activity(msg.user_id, "message", &msg.text);

        let ctx = ToolContext {
            user_id: msg.user_id,
            chat_id: msg.chat_id,
            chat_kind: msg.chat_kind,
            workspace,
        };
        let final_text = self.agent.run(&ctx, &msg.display_name, &msg.text).await;
        self.send_gate
            .send(msg.chat_id, msg.chat_kind, &final_text)
            .await;
    }

    /// Handle a button press from the chat layer.
    pub async fn handle_callback(&self, action: CallbackAction) {
        match action {
            CallbackAction::Approve {
                command_id,
                user_id,
            } => {
                let Some(pending) = self.approvals.consume(&command_id) else {
                    return;
                };
                // Only the owner may approve their own pending command.
                if pending.session_id != user_id && !self.access.is_admin(user_id) {
                    // Put it back untouched? No — consumption is single-shot;
                    // a foreign press voids the request instead of executing it.
                    tracing::warn!(
                        user_id,
                        owner = pending.session_id,
                        "approval pressed by non-owner; pending command voided"
                    );
                    return;
                }

                self.workspaces
                    .log_activity(pending.session_id, "approved", &pending.command);

                let ctx = ToolContext {
                    user_id: pending.session_id,
                    chat_id: pending.chat_id,
                    chat_kind: ChatKind::Private,
                    workspace: pending.cwd.clone().into(),
                };
                let result = self.exec.run_approved(&ctx, &pending.command).await;
                let text = if result.success {
                    format!("✅ `{}`\n{}", pending.command, result.for_model())
                } else {
                    format!("❌ `{}`\n{}", pending.command, result.for_model())
                };
                self.send_gate
                    .send(pending.chat_id, ChatKind::Private, &text)
                    .await;
            }
            CallbackAction::Deny {
                command_id,
                user_id,
            } => {
                if self.approvals.cancel(&command_id) {
                    tracing::info!(user_id, command_id = %command_id, "pending command denied");
                }
            }
            CallbackAction::Answer {
                question_id,
                option,
            } => {
                self.questions.resolve(&question_id, &option);
            }
        }
    }

    // ── Operator commands ────────────────────────────────────────────────

    async fn run_command(&self, msg: &InboundMessage, command: BotCommand) -> String {
        match command {
            BotCommand::Start => "👋 Ready. Send me a task — I work inside your own sandbox. \
                                  /help lists the commands."
                .to_string(),
            BotCommand::Help => "/status — runtime overview\n\
                                 /pending — your commands awaiting approval\n\
                                 /reset — forget our conversation\n\
                                 admin: /allow <id>, /deny <id>, /mode <admin_only|allowlist|public>"
                .to_string(),
            BotCommand::Status => {
                let sandboxes = self.sandbox.status().await;
                format!(
                    "users active: {}\nsandboxes: {}\nyour session depth: {}\nsandbox runtime: {}",
                    self.admission.active_users(),
                    sandboxes.len(),
                    self.sessions.depth(msg.user_id),
                    if self.sandbox.runtime_available() {
                        "available"
                    } else {
                        "unavailable"
                    },
                )
            }
            BotCommand::Pending => {
                let pending = self.approvals.list_for_session(msg.user_id);
                if pending.is_empty() {
                    "nothing pending".to_string()
                } else {
                    pending
                        .iter()
                        .map(|p| format!("• `{}` — {}", p.command, p.reason))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            BotCommand::Reset => {
                self.sessions.clear(msg.user_id);
                "🧹 Conversation history cleared.".to_string()
            }
            BotCommand::Allow(id) => self.admin_update(msg.user_id, |c| {
                if !c.allowlist.contains(&id) {
                    c.allowlist.push(id);
                }
            }),
            BotCommand::Deny(id) => self.admin_update(msg.user_id, |c| {
                c.allowlist.retain(|u| *u != id);
            }),
            BotCommand::Mode(mode) => self.admin_update(msg.user_id, |c| {
                c.mode = mode;
            }),
            BotCommand::Unknown(cmd) => format!("unknown command /{cmd} — try /help"),
        }
    }

    fn admin_update(
        &self,
        user_id: UserId,
        mutate: impl FnOnce(&mut crate::config::AccessConfig),
    ) -> String {
        if !self.access.is_admin(user_id) {
            return "🚫 admin only".to_string();
        }
        match self.access.update(mutate) {
            Ok(updated) => format!(
                "✅ access updated: mode={:?}, allowlist={:?}",
                updated.mode, updated.allowlist
            ),
            Err(e) => format!("⚠️ failed to persist access config: {e}"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_text_is_not_a_command() {
        assert_eq!(parse_bot_command("hello"), None);
    }

    #[test]
    fn parse_known_commands() {
        assert_eq!(parse_bot_command("/start"), Some(BotCommand::Start));
        assert_eq!(parse_bot_command("/help"), Some(BotCommand::Help));
        assert_eq!(parse_bot_command("/status"), Some(BotCommand::Status));
        assert_eq!(parse_bot_command("/pending"), Some(BotCommand::Pending));
        assert_eq!(parse_bot_command("/reset"), Some(BotCommand::Reset));
    }

    #[test]
    fn parse_allow_with_id() {
        assert_eq!(parse_bot_command("/allow 12345"), Some(BotCommand::Allow(12345)));
    }

    #[test]
    fn parse_allow_without_id_is_none() {
        assert_eq!(parse_bot_command("/allow"), None);
    }

    #[test]
    fn parse_mode_variants() {
        assert_eq!(
            parse_bot_command("/mode public"),
            Some(BotCommand::Mode(AccessMode::Public))
        );
        assert_eq!(
            parse_bot_command("/mode allowlist"),
            Some(BotCommand::Mode(AccessMode::Allowlist))
        );
        assert_eq!(parse_bot_command("/mode sideways"), None);
    }

    #[test]
    fn parse_strips_bot_mention() {
        assert_eq!(parse_bot_command("/start@MoatBot"), Some(BotCommand::Start));
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_bot_command("/frobnicate"),
            Some(BotCommand::Unknown("frobnicate".into()))
        );
    }
}
