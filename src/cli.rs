//! moatbot CLI — headless entry point for the chat-bot agent runtime.
//!
//! `moatbot run` wires the whole stack together and starts the Telegram
//! long-poll loop.  The one-shot subcommands (`check-cmd`, `check-path`,
//! `scan`) run a single classifier / guard / sanitizer pass for operator
//! debugging of the pattern lists.

use std::{io::Read, path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};

use moatbot::{
    agent::{AgentConfig, AgentLoop, SessionStore},
    ai::OpenAiCompatProvider,
    approval::{ApprovalQueue, QuestionBook},
    channels::{ChatKind, Router},
    config::{self, AppConfig},
    gate::{ConcurrencyGate, SendGate},
    sandbox::{ContainerRuntime, DockerRuntime, SandboxManager},
    security::{
        AccessStore, CommandGate, FileOp, GateDecision, OutputSanitizer, PathGuard, PatternStore,
    },
    tools::{
        AskUserTool, ExecTool, FileDeleteTool, FileEditTool, FileListTool, FileReadTool,
        FileSearchTool, FileWriteTool, MemoryTool, ToolRegistry, WebFetchTool,
    },
    workspace::WorkspaceManager,
};

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "moatbot",
    about = "Multi-tenant chat-bot agent runtime with a hardened execution core",
    version
)]
struct Cli {
    /// Path to config.toml (default: ~/.moatbot/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the bot (default).
    Run,
    /// Classify a shell command the way the agent's gate would.
    CheckCmd {
        command: String,
        /// Classify as if the command came from a group chat.
        #[arg(long)]
        group: bool,
    },
    /// Run a file path through the path guard for a given user id.
    CheckPath {
        path: String,
        #[arg(long, default_value_t = 0)]
        user: i64,
    },
    /// Sanitize text from a file (or stdin with `-`) and print the result.
    Scan { input: String },
    /// Print the effective configuration.
    Config,
}

fn load(cli: &Cli) -> AppConfig {
    match &cli.config {
        Some(path) => config::load_config(path).unwrap_or_else(|e| {
            eprintln!("warning: {e}; using defaults");
            AppConfig::default()
        }),
        None => config::load_default_config(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load(&cli);

    let result = match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => run(config).await,
        Commands::CheckCmd { command, group } => check_cmd(&config, command, *group),
        Commands::CheckPath { path, user } => check_path(&config, path, *user),
        Commands::Scan { input } => scan(&config, input),
        Commands::Config => {
            match toml::to_string_pretty(&config) {
                Ok(text) => {
                    println!("{text}");
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// One-shot subcommands
// ---------------------------------------------------------------------------

fn patterns_for(config: &AppConfig) -> Result<Arc<PatternStore>, String> {
    match &config.patterns.file {
        Some(path) => Ok(Arc::new(PatternStore::from_path(PathBuf::from(path))?)),
        None => Ok(Arc::new(PatternStore::builtin()?)),
    }
}

fn check_cmd(config: &AppConfig, command: &str, group: bool) -> Result<(), String> {
    let patterns = patterns_for(config)?;
    let gate = CommandGate::new(patterns, PathBuf::from(&config.workspace.root).as_path())?;
    let kind = if group { ChatKind::Group } else { ChatKind::Private };
    match gate.classify(command, 0, kind) {
        GateDecision::Allowed => println!("allowed"),
        GateDecision::NeedsApproval { reason } => println!("needs approval: {reason}"),
        GateDecision::Blocked { reason } => println!("blocked: {reason}"),
    }
    Ok(())
}

fn check_path(config: &AppConfig, path: &str, user: i64) -> Result<(), String> {
    let patterns = patterns_for(config)?;
    let guard = PathGuard::new(patterns, PathBuf::from(&config.workspace.root));
    match guard.check(user, path, FileOp::Read, None) {
        Ok(resolved) => println!("allowed: {}", resolved.display()),
        Err(reason) => println!("blocked: {reason}"),
    }
    Ok(())
}

fn scan(config: &AppConfig, input: &str) -> Result<(), String> {
    let text = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| e.to_string())?;
        buffer
    } else {
        std::fs::read_to_string(input).map_err(|e| format!("failed to read {input}: {e}"))?
    };
    let sanitizer = OutputSanitizer::new(patterns_for(config)?)?;
    println!("{}", sanitizer.sanitize(&text));
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[cfg(not(feature = "channels-telegram"))]
async fn run(_config: AppConfig) -> Result<(), String> {
    Err("this build has no chat transport; rebuild with --features channels-telegram".to_string())
}

#[cfg(feature = "channels-telegram")]
async fn run(config: AppConfig) -> Result<(), String> {
    use moatbot::channels::TelegramChannel;

    let token = std::env::var(&config.telegram.token_env)
        .map_err(|_| format!("set {} with the bot token", config.telegram.token_env))?;
    let api_key = std::env::var(&config.provider.api_key_env).unwrap_or_default();

    // ── Shared state ─────────────────────────────────────────────────────
    let workspaces = Arc::new(WorkspaceManager::new(
        PathBuf::from(&config.workspace.root),
        config.workspace.notes_inject_bytes,
    )?);
    let patterns = patterns_for(&config)?;
    let access = Arc::new(AccessStore::from_path(
        config::default_config_path()
            .map(|p| p.with_file_name("access.toml"))
            .unwrap_or_else(|_| PathBuf::from("access.toml")),
        config.access.clone(),
    ));
    let sanitizer = Arc::new(OutputSanitizer::new(patterns.clone())?);
    let gate = Arc::new(CommandGate::new(
        patterns.clone(),
        PathBuf::from(&config.workspace.root).as_path(),
    )?);
    let guard = Arc::new(PathGuard::new(
        patterns.clone(),
        PathBuf::from(&config.workspace.root),
    ));

    // ── Sandbox runtime ──────────────────────────────────────────────────
    let runtime: Option<Arc<dyn ContainerRuntime>> = match DockerRuntime::detect() {
        Some(docker) => {
            if docker.ping().await {
                Some(Arc::new(docker))
            } else {
                tracing::warn!("docker binary found but the daemon is not responding");
                None
            }
        }
        None => {
            tracing::warn!("no container runtime found");
            None
        }
    };
    if runtime.is_none() && !config.sandbox.allow_host_fallback {
        tracing::warn!("command execution is disabled until a container runtime is available");
    }
    let sandbox = Arc::new(SandboxManager::new(
        runtime,
        config.sandbox.clone(),
        workspaces.clone(),
    ));

    // ── Chat transport and gates ─────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        token,
        config.telegram.polling_timeout_secs,
    ));
    let send_gate = Arc::new(SendGate::new(telegram.clone(), &config.limits));
    let admission = Arc::new(ConcurrencyGate::new(config.limits.max_concurrent_users));
    let approvals = Arc::new(ApprovalQueue::new(Duration::from_secs(
        config.limits.approval_ttl_secs,
    )));
    let questions = Arc::new(QuestionBook::new(Duration::from_secs(
        config.limits.question_ttl_secs,
    )));
    let sessions = Arc::new(SessionStore::new(config.limits.max_session_pairs));

    // ── Tools ────────────────────────────────────────────────────────────
    let exec = Arc::new(ExecTool::new(
        gate,
        sandbox.clone(),
        sanitizer.clone(),
        approvals.clone(),
        telegram.clone(),
    ));
    let mut registry = ToolRegistry::new();
    registry.register(exec.clone());
    registry.register(Arc::new(FileReadTool::new(guard.clone(), sanitizer.clone())));
    registry.register(Arc::new(FileWriteTool::new(guard.clone())));
    registry.register(Arc::new(FileEditTool::new(guard.clone())));
    registry.register(Arc::new(FileDeleteTool::new(guard.clone())));
    registry.register(Arc::new(FileListTool::new(guard.clone())));
    registry.register(Arc::new(FileSearchTool::new(guard.clone(), sanitizer.clone())));
    registry.register(Arc::new(WebFetchTool::new(patterns.clone(), sanitizer.clone())));
    registry.register(Arc::new(MemoryTool::new(workspaces.clone())));
    registry.register(Arc::new(AskUserTool::new(questions.clone(), telegram.clone())));

    // ── Agent and router ─────────────────────────────────────────────────
    let provider = Arc::new(OpenAiCompatProvider::new(
        config.provider.base_url.clone(),
        api_key,
        config.provider.model.clone(),
        Duration::from_secs(config.provider.request_timeout_secs),
    ));
    let agent = Arc::new(AgentLoop::new(
        provider,
        Arc::new(registry),
        sessions.clone(),
        workspaces.clone(),
        AgentConfig::from_limits(
            config.provider.model.clone(),
            &config.limits,
            config.sandbox.port_base,
        ),
    ));

    let router = Arc::new(Router {
        access,
        patterns,
        admission,
        send_gate,
        agent,
        approvals,
        questions,
        sessions,
        sandbox: sandbox.clone(),
        workspaces,
        exec,
        callbacks: telegram.clone(),
    });

    // ── Background sweep ─────────────────────────────────────────────────
    let sweep_sandbox = sandbox.clone();
    let sweep_interval = Duration::from_secs(config.sandbox.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            sweep_sandbox.sweep().await;
        }
    });

    tracing::info!("moatbot is up; polling for messages");

    // ── Main loop with graceful teardown ─────────────────────────────────
    tokio::select! {
        _ = telegram.listen(router) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down; destroying sandboxes");
            sandbox.shutdown().await;
        }
    }
    Ok(())
}
