//! Memory tool: the only writer of the per-workspace notes file.
//!
//! Notes persist across sessions and a truncated tail is injected into the
//! system prompt.  Conversation history is deliberately *not* stored here —
//! the session store keeps its own bounded pairs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::workspace::WorkspaceManager;

use super::traits::{Tool, ToolContext, ToolResult};

pub struct MemoryTool {
    workspaces: Arc<WorkspaceManager>,
}

impl MemoryTool {
    pub fn new(workspaces: Arc<WorkspaceManager>) -> Self {
        Self { workspaces }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Manage your persistent notes about this user. \
         action=append adds a line, action=read returns all notes, action=clear wipes them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["append", "read", "clear"]
                },
                "text": {
                    "type": "string",
                    "description": "The note to append (action=append only)."
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(action) = args.get("action").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'action'");
        };

        match action {
            "append" => {
                let Some(text) = args.get("text").and_then(Value::as_str) else {
                    return ToolResult::err("action=append requires 'text'");
                };
                match self.workspaces.append_notes(ctx.user_id, text) {
                    Ok(()) => ToolResult::ok("noted"),
                    Err(e) => ToolResult::err(e),
                }
            }
            "read" => {
                let notes = self.workspaces.read_notes(ctx.user_id);
                if notes.trim().is_empty() {
                    ToolResult::ok("(no notes yet)")
                } else {
                    ToolResult::ok(notes)
                }
            }
            "clear" => match self.workspaces.clear_notes(ctx.user_id) {
                Ok(()) => ToolResult::ok("notes cleared"),
                Err(e) => ToolResult::err(e),
            },
            other => ToolResult::err(format!("unknown action '{other}'")),
        }
    }
}
