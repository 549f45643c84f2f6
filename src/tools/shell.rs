//! Shell tool: the only path from the model to command execution.
//!
//! Every command goes classifier → sandbox → sanitizer.  Blocked commands
//! never touch the sandbox executor; dangerous commands park in the approval
//! queue and the turn moves on with an `approval_required` observation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    approval::ApprovalQueue,
    channels::ChatCallbacks,
    sandbox::{SandboxError, SandboxManager},
    security::{CommandGate, GateDecision, OutputSanitizer},
};

use super::traits::{Tool, ToolContext, ToolResult};

pub struct ExecTool {
    gate: Arc<CommandGate>,
    sandbox: Arc<SandboxManager>,
    sanitizer: Arc<OutputSanitizer>,
    approvals: Arc<ApprovalQueue>,
    callbacks: Arc<dyn ChatCallbacks>,
}

impl ExecTool {
    pub fn new(
        gate: Arc<CommandGate>,
        sandbox: Arc<SandboxManager>,
        sanitizer: Arc<OutputSanitizer>,
        approvals: Arc<ApprovalQueue>,
        callbacks: Arc<dyn ChatCallbacks>,
    ) -> Self {
        Self {
            gate,
            sandbox,
            sanitizer,
            approvals,
            callbacks,
        }
    }

    /// Execute a pre-approved command directly (the approval-button path;
    /// bypasses classification because the stored command already passed it).
    pub async fn run_approved(&self, ctx: &ToolContext, command: &str) -> ToolResult {
        self.run_in_sandbox(ctx, command).await
    }

    async fn run_in_sandbox(&self, ctx: &ToolContext, command: &str) -> ToolResult {
        match self.sandbox.execute(ctx.user_id, command).await {
            Ok(result) => {
                let raw = if result.stderr.is_empty() {
                    result.stdout.clone()
                } else if result.stdout.is_empty() {
                    format!("STDERR: {}", result.stderr)
                } else {
                    format!("{}\nSTDERR: {}", result.stdout, result.stderr)
                };
                let clean = self.sanitizer.sanitize(&raw);
                if result.success() {
                    ToolResult::ok(clean)
                } else {
                    ToolResult::err(format!(
                        "exit code {}: {clean}",
                        result.exit_code.map_or("?".to_string(), |c| c.to_string())
                    ))
                }
            }
            Err(SandboxError::Timeout(secs)) => {
                ToolResult::err(format!("command timed out after {secs}s"))
            }
            Err(SandboxError::Unavailable) => ToolResult::err(
                "sandbox unavailable: command execution is disabled until the container runtime is back",
            ),
            Err(e) => ToolResult::err(format!("sandbox error: {e}")),
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in your isolated sandbox and return its output. \
         Dangerous commands require the user's confirmation; some commands are blocked outright."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'command'");
        };

        match self.gate.classify(command, ctx.user_id, ctx.chat_kind) {
            GateDecision::Blocked { reason } => {
                tracing::warn!(user_id = ctx.user_id, command, reason = %reason, "[BLOCKED] command refused");
                ToolResult::refused(reason)
            }
            GateDecision::NeedsApproval { reason } => {
                let id = self.approvals.store(
                    ctx.user_id,
                    ctx.chat_id,
                    command,
                    &ctx.workspace.display().to_string(),
                    &reason,
                );
                // The prompt renders outside this turn; the loop does not
                // block on the outcome.
                let shown = self
                    .callbacks
                    .show_approval(ctx.chat_id, &id, command, &reason)
                    .await;
                if !shown {
                    self.approvals.cancel(&id);
                    return ToolResult::err("could not display the approval prompt");
                }
                ToolResult::err(
                    "approval_required: waiting for the user to confirm. \
                     Do not retry; tell the user what you asked for and finish your reply.",
                )
            }
            GateDecision::Allowed => self.run_in_sandbox(ctx, command).await,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::{
        ChatId, MessageId, UserId,
        channels::{ChatKind, SendError},
        config::SandboxConfig,
        security::PatternStore,
        workspace::WorkspaceManager,
    };

    struct PromptRecorder {
        approvals: StdMutex<Vec<(ChatId, String, String)>>,
    }

    #[async_trait]
    impl ChatCallbacks for PromptRecorder {
        async fn send_message(&self, _: ChatId, _: &str) -> Result<Option<MessageId>, SendError> {
            Ok(Some(1))
        }
        async fn edit_message(&self, _: ChatId, _: MessageId, _: &str) -> bool {
            true
        }
        async fn delete_message(&self, _: ChatId, _: MessageId) -> bool {
            true
        }
        async fn set_reaction(&self, _: ChatId, _: MessageId, _: &str) -> bool {
            true
        }
        async fn send_file(&self, _: ChatId, _: &Path, _: Option<&str>) -> bool {
            true
        }
        async fn send_direct_message(&self, _: UserId, _: &str) -> bool {
            true
        }
        async fn show_approval(&self, chat_id: ChatId, id: &str, command: &str, _: &str) -> bool {
            self.approvals
                .lock()
                .unwrap()
                .push((chat_id, id.to_string(), command.to_string()));
            true
        }
        async fn show_question(&self, _: ChatId, _: &str, _: &str, _: &[String]) -> bool {
            true
        }
    }

    struct Fixture {
        _dir: TempDir,
        tool: ExecTool,
        approvals: Arc<ApprovalQueue>,
        chat: Arc<PromptRecorder>,
        ctx: ToolContext,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ws");
        let workspaces = Arc::new(WorkspaceManager::new(root.clone(), 4096).unwrap());
        let patterns = Arc::new(PatternStore::builtin().unwrap());
        let gate = Arc::new(CommandGate::new(patterns.clone(), &root).unwrap());
        // Host fallback on: tests run without a container runtime.
        let sandbox = Arc::new(SandboxManager::new(
            None,
            SandboxConfig {
                allow_host_fallback: true,
                ..SandboxConfig::default()
            },
            workspaces.clone(),
        ));
        let sanitizer = Arc::new(OutputSanitizer::new(patterns).unwrap());
        let approvals = Arc::new(ApprovalQueue::new(Duration::from_secs(300)));
        let chat = Arc::new(PromptRecorder {
            approvals: StdMutex::new(Vec::new()),
        });

        let workspace = workspaces.user_dir(42).unwrap();
        let tool = ExecTool::new(
            gate,
            sandbox,
            sanitizer,
            approvals.clone(),
            chat.clone(),
        );
        Fixture {
            _dir: dir,
            tool,
            approvals,
            chat,
            ctx: ToolContext {
                user_id: 42,
                chat_id: 100,
                chat_kind: ChatKind::Private,
                workspace,
            },
        }
    }

    #[tokio::test]
    async fn allowed_command_runs_and_returns_output() {
        let f = fixture();
        let r = f.tool.execute(&f.ctx, json!({"command": "echo hello"})).await;
        assert!(r.success, "got: {r:?}");
        assert!(r.output.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn blocked_command_never_executes() {
        let f = fixture();
        let r = f.tool.execute(&f.ctx, json!({"command": "env"})).await;
        assert!(!r.success);
        let error = r.error.unwrap();
        assert!(error.starts_with("🚫"));
        assert!(error.contains("environment variables"));
    }

    #[tokio::test]
    async fn dangerous_command_parks_in_approval_queue() {
        let f = fixture();
        let r = f.tool.execute(&f.ctx, json!({"command": "rm -rf build/"})).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("approval_required"));

        // The prompt was shown and the command is retrievable.
        let shown = f.chat.approvals.lock().unwrap().clone();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].2, "rm -rf build/");
        let pending = f.approvals.list_for_session(42);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command, "rm -rf build/");
    }

    #[tokio::test]
    async fn dangerous_in_group_is_blocked_without_prompt() {
        let f = fixture();
        let ctx = ToolContext {
            chat_kind: ChatKind::Group,
            ..f.ctx.clone()
        };
        let r = f.tool.execute(&ctx, json!({"command": "rm -rf build/"})).await;
        assert!(!r.success);
        assert!(r.error.unwrap().starts_with("🚫"));
        assert!(f.chat.approvals.lock().unwrap().is_empty(), "no prompt in groups");
        assert!(f.approvals.list_for_session(42).is_empty());
    }

    #[tokio::test]
    async fn output_is_sanitized() {
        let f = fixture();
        let r = f
            .tool
            .execute(&f.ctx, json!({"command": "echo TOKEN=supersecretvalue"}))
            .await;
        assert!(r.success);
        let out = r.output.unwrap();
        assert!(out.contains("TOKEN=[REDACTED]"), "got: {out}");
        assert!(!out.contains("supersecretvalue"));
    }

    #[tokio::test]
    async fn missing_command_argument_is_an_error() {
        let f = fixture();
        let r = f.tool.execute(&f.ctx, json!({})).await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn run_approved_executes_directly() {
        let f = fixture();
        let r = f.tool.run_approved(&f.ctx, "echo approved-run").await;
        assert!(r.success);
        assert!(r.output.unwrap().contains("approved-run"));
    }
}
