//! The ReAct loop: one call per inbound user message.
//!
//! ```text
//! assemble(system prompt + session pairs + framed user message)
//!       │
//!       ▼
//! provider.complete(tools)  ──► text, no tool calls ──► append pair, return
//!       │
//!       ▼ tool calls present
//! for each call (sequentially):
//!   dispatch through the registry (classifier/guard/sandbox/sanitizer
//!   live inside the tools) with a hard per-tool timeout
//!       │
//!       ▼
//! iteration += 1; under the cap → repeat
//! ```
//!
//! Tool calls within one model response run sequentially: they may write to
//! the same workspace and share a single sandbox container.

use std::{sync::Arc, time::Duration};

use crate::{
    ai::{ChatMessage, ChatProvider, ChatRequest},
    config::LimitsConfig,
    sandbox::port_window,
    tools::{ToolContext, ToolRegistry, ToolResult},
    workspace::WorkspaceManager,
};

use super::{
    prompt::{self, PromptInputs},
    session::SessionStore,
};

/// Final text when the model keeps calling tools past the cap.
pub const MAX_ITERATIONS_NOTICE: &str =
    "⚠️ I hit my step limit for this request. Here is where I stopped — ask me to continue if needed.";

/// Nudge injected when the model returns neither text nor tool calls.
const EMPTY_RESPONSE_NUDGE: &str =
    "(empty response — reply with your final answer or call a tool)";

// ─── AgentConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_iterations: usize,
    pub tool_timeout: Duration,
    pub port_base: u16,
}

impl AgentConfig {
    pub fn from_limits(model: String, limits: &LimitsConfig, port_base: u16) -> Self {
        Self {
            model,
            temperature: Some(0.7),
            max_tokens: Some(4096),
            max_iterations: limits.max_iterations,
            tool_timeout: Duration::from_secs(limits.tool_timeout_secs),
            port_base,
        }
    }
}

// ─── AgentLoop ───────────────────────────────────────────────────────────────

pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    workspaces: Arc<WorkspaceManager>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        workspaces: Arc<WorkspaceManager>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            sessions,
            workspaces,
            config,
        }
    }

    /// Run one agent turn.  Always returns user-facing final text; every
    /// failure mode is folded into it.
    #[tracing::instrument(
        name = "agent.run",
        skip_all,
        fields(user_id = ctx.user_id, msg_len = user_message.len())
    )]
    pub async fn run(&self, ctx: &ToolContext, display_name: &str, user_message: &str) -> String {
        let mut messages = self.assemble(ctx, display_name, user_message);

        for _iteration in 0..self.config.max_iterations {
            let request = {
                let mut r = ChatRequest::new(self.config.model.clone(), messages.clone())
                    .with_tools(self.registry.specs());
                if let Some(t) = self.config.temperature {
                    r = r.with_temperature(t);
                }
                if let Some(m) = self.config.max_tokens {
                    r = r.with_max_tokens(m);
                }
                r
            };

            let response = match self.provider.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    // The failed turn is not recorded in the session.
                    tracing::warn!(user_id = ctx.user_id, error = %e, "LLM call failed");
                    return format!("⚠️ I could not reach the model: {e}");
                }
            };

            let reply = response.message;

            if reply.tool_calls.is_empty() {
                let text = reply.text().trim().to_string();
                if text.is_empty() {
                    messages.push(ChatMessage::user(EMPTY_RESPONSE_NUDGE));
                    continue;
                }
                self.sessions.append(ctx.user_id, user_message, &text);
                return text;
            }

            // Echo the assistant message (calls included) back into context,
            // then run the calls one at a time.
            messages.push(ChatMessage::assistant_with_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));

            for call in &reply.tool_calls {
                let result = self.dispatch(ctx, &call.name, call.arguments.clone()).await;
                messages.push(ChatMessage::tool_result(call.id.clone(), result.for_model()));
            }
        }

        self.sessions
            .append(ctx.user_id, user_message, MAX_ITERATIONS_NOTICE);
        MAX_ITERATIONS_NOTICE.to_string()
    }

    // ── Internal ─────────────────────────────────────────────────────────

    fn assemble(
        &self,
        ctx: &ToolContext,
        display_name: &str,
        user_message: &str,
    ) -> Vec<ChatMessage> {
        let ports = port_window(self.config.port_base, ctx.user_id);
        let notes = self.workspaces.notes_tail(ctx.user_id);
        let system = prompt::assemble(&PromptInputs {
            workspace: &ctx.workspace.display().to_string(),
            tool_names: self.registry.specs().iter().map(|s| s.name.clone()).collect(),
            ports: &ports,
            notes_tail: notes.as_deref(),
        });

        let mut messages = vec![ChatMessage::system(system)];
        for (user, assistant) in self.sessions.pairs(ctx.user_id) {
            messages.push(ChatMessage::user(user));
            messages.push(ChatMessage::assistant(assistant));
        }
        messages.push(ChatMessage::user(prompt::frame_user_message(
            display_name,
            user_message,
        )));
        messages
    }

    #[tracing::instrument(name = "agent.tool", skip_all, fields(tool = %name))]
    async fn dispatch(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: serde_json::Value,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(name) else {
            return ToolResult::err(format!("tool '{name}' is not registered"));
        };

        match tokio::time::timeout(self.config.tool_timeout, tool.execute(ctx, args)).await {
            Ok(result) => result,
            Err(_) => ToolResult::err(format!(
                "tool timed out after {}s",
                self.config.tool_timeout.as_secs()
            )),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
