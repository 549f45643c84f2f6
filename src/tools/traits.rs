use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChatId, UserId, ai::ToolSpec, channels::ChatKind};

/// Per-turn context every tool executes under.  Identifies the tenant and
/// the workspace the tool is confined to.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    /// The user's workspace directory (already created).
    pub workspace: PathBuf,
}

/// The wire-shape result of executing a [`Tool`]:
/// `{success: bool, output?: string, error?: string}`.
///
/// Refusals from the classifier and guard are results, not exceptions — the
/// model sees them as observations and can reason about them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// A security refusal, rendered with the 🚫 marker the model learns to
    /// treat as final.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self::err(format!("🚫 {}", reason.into()))
    }

    /// Render for the model's tool-result message.
    pub fn for_model(&self) -> String {
        match (&self.output, &self.error) {
            (_, Some(error)) => format!("Error: {error}"),
            (Some(output), None) if !output.is_empty() => output.clone(),
            _ => "(no output)".to_string(),
        }
    }
}

/// A capability the agent loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"exec_command"`.
    fn name(&self) -> &str;

    /// Human-readable description used in the LLM tool schema.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with the given per-turn context and arguments.  All failure
    /// modes are in-band in the [`ToolResult`].
    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult;

    /// Schema entry advertised to the model.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_result_shape() {
        let r = ToolResult::ok("hello");
        assert!(r.success);
        assert_eq!(r.output.as_deref(), Some("hello"));
        assert!(r.error.is_none());
    }

    #[test]
    fn refused_result_carries_marker() {
        let r = ToolResult::refused("Leaks all environment variables");
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().starts_with("🚫 "));
    }

    #[test]
    fn for_model_prefers_error() {
        assert_eq!(ToolResult::err("boom").for_model(), "Error: boom");
        assert_eq!(ToolResult::ok("out").for_model(), "out");
        assert_eq!(ToolResult::ok("").for_model(), "(no output)");
    }

    #[test]
    fn serialization_omits_absent_fields() {
        let json = serde_json::to_value(ToolResult::ok("x")).unwrap();
        assert!(json.get("error").is_none());
        let json = serde_json::to_value(ToolResult::err("y")).unwrap();
        assert!(json.get("output").is_none());
    }
}
