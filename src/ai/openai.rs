//! OpenAI-compatible chat-completions client.
//!
//! Speaks the `/chat/completions` dialect with function tools.  The wire
//! conversion in both directions goes through the typed structs in
//! [`crate::ai::types`], which is also where non-standard provider fields
//! get dropped before the next turn can resend them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    provider::{ChatProvider, ProviderError, Result},
    types::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, ToolCall},
};

// ─── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the chat-completions dialect.
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Deserialize)]
struct WireErrorBody {
    message: String,
}

// ─── Conversions ─────────────────────────────────────────────────────────────

fn to_wire(message: &ChatMessage) -> WireMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    WireMessage {
        role: role.to_string(),
        content: message.content.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|c| WireToolCall {
                id: c.id.clone(),
                kind: "function".to_string(),
                function: WireFunctionCall {
                    name: c.name.clone(),
                    arguments: c.arguments.to_string(),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn from_wire(message: WireMessage) -> Result<ChatMessage> {
    let role = match message.role.as_str() {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        other => return Err(ProviderError::Shape(format!("unknown role '{other}'"))),
    };

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|c| {
            let arguments: Value = serde_json::from_str(&c.function.arguments)
                .unwrap_or(Value::Object(serde_json::Map::new()));
            ToolCall {
                id: c.id,
                name: c.function.name,
                arguments,
            }
        })
        .collect();

    Ok(ChatMessage {
        role,
        content: message.content,
        tool_calls,
        tool_call_id: message.tool_call_id,
    })
}

// ─── OpenAiCompatProvider ────────────────────────────────────────────────────

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let wire = WireRequest {
            model: &request.model,
            messages: request.messages.iter().map(to_wire).collect(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<WireError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(ProviderError::Api(format!("{status}: {detail}")));
        }

        let parsed: WireResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Shape(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Shape("response has no choices".to_string()))?;

        Ok(ChatResponse {
            message: from_wire(choice.message)?,
            finish_reason: choice.finish_reason,
            usage: parsed.usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
