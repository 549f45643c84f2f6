//! `ask_user` tool: suspends the agent turn on a pending question until the
//! user picks one of the offered options (or the question times out).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{approval::QuestionBook, channels::ChatCallbacks};

use super::traits::{Tool, ToolContext, ToolResult};

pub struct AskUserTool {
    questions: Arc<QuestionBook>,
    callbacks: Arc<dyn ChatCallbacks>,
}

impl AskUserTool {
    pub fn new(questions: Arc<QuestionBook>, callbacks: Arc<dyn ChatCallbacks>) -> Self {
        Self {
            questions,
            callbacks,
        }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user to choose one of up to five options. \
         Blocks until they answer; use only when you genuinely cannot proceed without their choice."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 2,
                    "maxItems": 5
                }
            },
            "required": ["question", "options"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(question) = args.get("question").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'question'");
        };
        let options: Vec<String> = args
            .get("options")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if options.len() < 2 {
            return ToolResult::err("'options' must list at least two choices");
        }

        let (id, rx) = self.questions.ask();
        let shown = self
            .callbacks
            .show_question(ctx.chat_id, &id, question, &options)
            .await;
        if !shown {
            return ToolResult::err("could not display the question");
        }

        match tokio::time::timeout(self.questions.ttl(), rx).await {
            Ok(Ok(answer)) => ToolResult::ok(format!("user chose: {answer}")),
            // Receiver failed (entry expired) or the outer timeout fired.
            _ => ToolResult::err("the user did not answer in time"),
        }
    }
}
