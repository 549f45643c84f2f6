//! Web fetch tool for HTTP GET requests.
//!
//! Outbound URLs are vetted against the blocklist (loopback, private
//! ranges, cloud metadata endpoints) and the body passes through the output
//! sanitizer like every other tool result — documentation pages with
//! token-like strings get redacted, and that is accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use serde_json::{Value, json};
use url::Url;

use crate::security::{OutputSanitizer, PatternStore};

use super::traits::{Tool, ToolContext, ToolResult};

/// Maximum response size to return (1 MB).
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct WebFetchTool {
    patterns: Arc<PatternStore>,
    sanitizer: Arc<OutputSanitizer>,
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new(patterns: Arc<PatternStore>, sanitizer: Arc<OutputSanitizer>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .redirect(Policy::limited(5))
            .user_agent("moatbot/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            patterns,
            sanitizer,
            client,
        }
    }

    /// Scheme and blocklist vetting, shared with the tests.
    pub fn validate_url(&self, url: &str) -> Result<Url, String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(format!("unsupported URL scheme '{scheme}'")),
        }
        if self.patterns.current().is_blocked_url(url) {
            return Err("this address is not reachable from the sandbox".to_string());
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page or API response over HTTP GET and return the body as text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The http(s) URL to fetch." }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(url) = args.get("url").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'url'");
        };

        let parsed = match self.validate_url(url) {
            Ok(u) => u,
            Err(reason) => return ToolResult::refused(reason),
        };

        let response = match self.client.get(parsed).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("fetch failed: {e}")),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::err(format!("failed to read body: {e}")),
        };

        let mut body = body;
        if body.len() > MAX_RESPONSE_SIZE {
            let mut cut = MAX_RESPONSE_SIZE;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("\n… (truncated at 1 MB)");
        }

        let clean = self.sanitizer.sanitize(&body);
        if status.is_success() {
            ToolResult::ok(clean)
        } else {
            ToolResult::err(format!("HTTP {status}: {clean}"))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
