//! TOML configuration schema for moatbot.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.moatbot/config.toml`:
//! ```toml
//! [provider]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//!
//! [access]
//! admin_id = 111222333
//! mode = "allowlist"
//! allowlist = [111222333, 444555666]
//!
//! [sandbox]
//! image = "moatbot-sandbox:latest"
//! idle_ttl_secs = 1800
//!
//! [workspace]
//! root = "/srv/moatbot/workspaces"
//! ```

use serde::{Deserialize, Serialize};

use crate::UserId;

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible chat-completions endpoint.
    pub base_url: String,
    /// Environment variable holding the API key.  Credentials are never
    /// written into the config file itself.
    pub api_key_env: String,
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    pub model: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum retry attempts on transient errors.
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key_env: "MOATBOT_API_KEY".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            request_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

// ─── AccessMode ──────────────────────────────────────────────────────────────

/// Who may address the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Only the configured admin id.
    #[default]
    AdminOnly,
    /// The admin plus every id on the allowlist.
    Allowlist,
    /// Everyone.
    Public,
}

// ─── AccessConfig ────────────────────────────────────────────────────────────

/// Runtime-mutable access control settings.  Persisted to its own file so an
/// operator edit takes effect without a restart (hot-read on every check).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Admin user id.  `None` degrades every non-public check to deny.
    pub admin_id: Option<UserId>,
    pub mode: AccessMode,
    pub allowlist: Vec<UserId>,
    /// Master switch for the bot.  When off, inbound messages are ignored.
    pub bot_enabled: bool,
    /// Switch for the userbot surface (separate inbound path, same core).
    pub userbot_enabled: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            admin_id: None,
            mode: AccessMode::default(),
            allowlist: Vec::new(),
            bot_enabled: true,
            userbot_enabled: false,
        }
    }
}

// ─── LimitsConfig ────────────────────────────────────────────────────────────

/// Bounds on concurrency, iteration, history depth, and pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of users processed concurrently; others get "busy".
    pub max_concurrent_users: usize,
    /// Maximum ReAct iterations per agent turn.
    pub max_iterations: usize,
    /// Maximum `(user, assistant)` pairs kept per session.
    pub max_session_pairs: usize,
    /// Hard per-tool-call timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Minimum interval between any two outbound sends, in milliseconds.
    pub send_interval_ms: u64,
    /// Minimum interval between sends to the same group chat, in seconds.
    pub group_interval_secs: u64,
    /// Retry attempts after a platform throttle error.
    pub send_retries: u32,
    /// Pending dangerous-command lifetime in seconds.
    pub approval_ttl_secs: u64,
    /// Pending question lifetime in seconds.
    pub question_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_users: 10,
            max_iterations: 30,
            max_session_pairs: 20,
            tool_timeout_secs: 120,
            send_interval_ms: 200,
            group_interval_secs: 5,
            send_retries: 3,
            approval_ttl_secs: 5 * 60,
            question_ttl_secs: 2 * 60,
        }
    }
}

// ─── SandboxConfig ───────────────────────────────────────────────────────────

/// Per-user container sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Fixed container image for user sandboxes.
    pub image: String,
    /// Memory limit in MiB (also the swap ceiling: no extra swap).
    pub memory_limit_mb: u64,
    /// CPU share as a fraction of one core.
    pub cpu_limit: f64,
    /// Process-count limit inside the container.
    pub pids_limit: u64,
    /// First host port of the global port pool; each user gets ten
    /// consecutive ports at `port_base + (uid mod 10) * 10`.
    pub port_base: u16,
    /// Destroy a sandbox after this many seconds of inactivity.
    pub idle_ttl_secs: u64,
    /// Wall-clock timeout for a single command inside the sandbox.
    pub command_timeout_secs: u64,
    /// Interval of the background sweep that enforces the idle TTL.
    pub sweep_interval_secs: u64,
    /// Background processes inside a sandbox older than this are killed by
    /// the sweep.
    pub background_timeout_secs: u64,
    /// Soft workspace size limit in MiB (reported, not enforced).
    pub workspace_soft_limit_mb: u64,
    /// When the container runtime is unavailable, run commands directly on
    /// the host (degraded mode).  Off by default: with no sandbox the agent
    /// refuses to execute instead.
    pub allow_host_fallback: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "alpine:3.20".to_owned(),
            memory_limit_mb: 512,
            cpu_limit: 0.5,
            pids_limit: 100,
            port_base: 20000,
            idle_ttl_secs: 30 * 60,
            command_timeout_secs: 120,
            sweep_interval_secs: 5 * 60,
            background_timeout_secs: 10 * 60,
            workspace_soft_limit_mb: 512,
            allow_host_fallback: false,
        }
    }
}

// ─── WorkspaceConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory of all per-user workspaces.  `<root>/_shared` is
    /// reserved for operator-only logs.
    pub root: String,
    /// Maximum bytes of the notes file injected into the system prompt.
    pub notes_inject_bytes: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: "/srv/moatbot/workspaces".to_owned(),
            notes_inject_bytes: 4096,
        }
    }
}

// ─── TelegramConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    /// Environment variable holding the bot token.
    pub token_env: String,
    /// Long-polling timeout in seconds.
    pub polling_timeout_secs: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_env: "MOATBOT_TELEGRAM_TOKEN".to_owned(),
            polling_timeout_secs: 30,
        }
    }
}

// ─── PatternsConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PatternsConfig {
    /// Optional path to a `patterns.toml` overriding the built-in lists.
    /// The file is re-checked (mtime) before each classification, so an
    /// operator fixing a bypass does not have to restart the process.
    pub file: Option<String>,
}

// ─── AppConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub access: AccessConfig,
    pub limits: LimitsConfig,
    pub sandbox: SandboxConfig,
    pub workspace: WorkspaceConfig,
    pub telegram: TelegramConfig,
    pub patterns: PatternsConfig,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
