//! Access policy: who may address the agent at all.
//!
//! Consulted once per inbound message, before any pattern checks.  The
//! decision depends on the chat kind because a denial in a group chat must be
//! silent — the bot does not reveal its existence to untrusted senders.

use std::{
    path::PathBuf,
    sync::RwLock,
    time::SystemTime,
};

use crate::{
    UserId,
    channels::ChatKind,
    config::{AccessConfig, AccessMode, file_mtime, write_atomic},
};

// ─── AccessDecision ──────────────────────────────────────────────────────────

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The message proceeds to validation and the agent.
    Permit,
    /// Group context: the message is seen but never answered.
    DenySilent,
    /// Private context: reply once with an access-denied notice.
    DenyMessage,
}

/// Evaluate the access rules for one inbound message.
///
/// The admin id always permits.  An unconfigured admin id degrades to deny
/// for every non-public mode.
pub fn check_access(config: &AccessConfig, user_id: UserId, chat_kind: ChatKind) -> AccessDecision {
    if !config.bot_enabled {
        return AccessDecision::DenySilent;
    }

    let permitted = match config.mode {
        AccessMode::Public => true,
        AccessMode::AdminOnly => config.admin_id == Some(user_id),
        AccessMode::Allowlist => {
            config.admin_id == Some(user_id) || config.allowlist.contains(&user_id)
        }
    };

    if permitted {
        AccessDecision::Permit
    } else {
        match chat_kind {
            ChatKind::Private => AccessDecision::DenyMessage,
            ChatKind::Group => AccessDecision::DenySilent,
        }
    }
}

// ─── AccessStore ─────────────────────────────────────────────────────────────

/// Hot-reloading holder of the runtime-mutable [`AccessConfig`].
///
/// The config lives in its own TOML file so an operator edit (or an admin
/// `/allow` command) takes effect at the very next access check.  Mutations
/// go through [`AccessStore::update`], which persists atomically.
pub struct AccessStore {
    path: Option<PathBuf>,
    state: RwLock<CachedConfig>,
}

struct CachedConfig {
    mtime: Option<SystemTime>,
    config: AccessConfig,
}

impl AccessStore {
    /// In-memory store (tests, or config fully inlined in `config.toml`).
    pub fn in_memory(config: AccessConfig) -> Self {
        Self {
            path: None,
            state: RwLock::new(CachedConfig {
                mtime: None,
                config,
            }),
        }
    }

    /// File-backed store.  The file is created on the first mutation; until
    /// then `initial` is served.
    pub fn from_path(path: PathBuf, initial: AccessConfig) -> Self {
        let store = Self {
            path: Some(path),
            state: RwLock::new(CachedConfig {
                mtime: None,
                config: initial,
            }),
        };
        store.reload_if_stale();
        store
    }

    /// Current config, after the staleness check.
    pub fn current(&self) -> AccessConfig {
        self.reload_if_stale();
        match self.state.read() {
            Ok(s) => s.config.clone(),
            Err(poisoned) => poisoned.into_inner().config.clone(),
        }
    }

    /// Check access for one inbound message against the live config.
    pub fn check(&self, user_id: UserId, chat_kind: ChatKind) -> AccessDecision {
        check_access(&self.current(), user_id, chat_kind)
    }

    /// Whether `user_id` is the configured admin.
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.current().admin_id == Some(user_id)
    }

    /// Mutate the config and persist it (admin `/allow`, `/deny`, `/mode`).
    pub fn update(&self, mutate: impl FnOnce(&mut AccessConfig)) -> Result<AccessConfig, String> {
        let mut updated = self.current();
        mutate(&mut updated);

        if let Some(ref path) = self.path {
            let text = toml::to_string_pretty(&updated)
                .map_err(|e| format!("failed to serialise access config: {e}"))?;
            write_atomic(path, &text)?;
        }

        if let Ok(mut state) = self.state.write() {
            state.config = updated.clone();
            state.mtime = self.path.as_deref().and_then(file_mtime);
        }
        Ok(updated)
    }

    fn reload_if_stale(&self) {
        let Some(ref path) = self.path else { return };
        let on_disk = file_mtime(path);

        {
            let Ok(state) = self.state.read() else { return };
            if state.mtime == on_disk || on_disk.is_none() {
                return;
            }
        }

        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| toml::from_str::<AccessConfig>(&text).map_err(|e| e.to_string()))
        {
            Ok(config) => {
                if let Ok(mut state) = self.state.write() {
                    state.mtime = on_disk;
                    state.config = config;
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "access config reload failed; keeping previous");
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
