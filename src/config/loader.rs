//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.moatbot/config.toml` (or the path in `MOATBOT_CONFIG`)
//! 2. Apply `MOATBOT_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing
//!
//! # Atomic save
//! Writes to `<path>.tmp` → rename to `<path>` to avoid partial writes
//! corrupting the config file.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use super::schema::{AccessMode, AppConfig};

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.moatbot/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".moatbot").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `MOATBOT_CONFIG`).
pub fn load_default_config() -> AppConfig {
    let path = env::var("MOATBOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `MOATBOT_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `MOATBOT_MODEL`              → `provider.model`
/// - `MOATBOT_PROVIDER_URL`       → `provider.base_url`
/// - `MOATBOT_ADMIN_ID`           → `access.admin_id`
/// - `MOATBOT_ACCESS_MODE`        → `access.mode`
/// - `MOATBOT_WORKSPACE_ROOT`     → `workspace.root`
/// - `MOATBOT_SANDBOX_IMAGE`      → `sandbox.image`
/// - `MOATBOT_HOST_FALLBACK`      → `sandbox.allow_host_fallback` (1/0)
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("MOATBOT_MODEL") {
        config.provider.model = v;
    }
    if let Ok(v) = env::var("MOATBOT_PROVIDER_URL") {
        config.provider.base_url = v;
    }
    if let Ok(v) = env::var("MOATBOT_ADMIN_ID")
        && let Ok(id) = v.parse::<i64>()
    {
        config.access.admin_id = Some(id);
    }
    if let Ok(v) = env::var("MOATBOT_ACCESS_MODE") {
        match v.as_str() {
            "admin_only" => config.access.mode = AccessMode::AdminOnly,
            "allowlist" => config.access.mode = AccessMode::Allowlist,
            "public" => config.access.mode = AccessMode::Public,
            _ => {}
        }
    }
    if let Ok(v) = env::var("MOATBOT_WORKSPACE_ROOT") {
        config.workspace.root = v;
    }
    if let Ok(v) = env::var("MOATBOT_SANDBOX_IMAGE") {
        config.sandbox.image = v;
    }
    if let Ok(v) = env::var("MOATBOT_HOST_FALLBACK") {
        config.sandbox.allow_host_fallback = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically save `config` to `path`.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialise config: {e}"))?;
    write_atomic(path, &content)
}

/// Write `content` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, content).map_err(|e| format!("failed to write temp file: {e}"))?;
    fs::rename(&tmp_path, path).map_err(|e| format!("failed to replace {path:?}: {e}"))?;
    Ok(())
}

// ─── Hot-reload support ──────────────────────────────────────────────────────

/// Modification time of `path`, if it exists.
///
/// Used by the hot-reloading stores ([`crate::security::AccessStore`],
/// [`crate::security::PatternStore`]) for their cheap staleness check.
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[provider]
model = "gpt-4o"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.max_retries, 3);
        assert_eq!(config.limits.max_iterations, 30);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut original = AppConfig::default();
        original.provider.model = "claude-3-haiku".to_owned();
        original.access.admin_id = Some(99);

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, original, "config should round-trip through save/load");
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("config.toml");
        save_config(&nested, &AppConfig::default()).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn mtime_changes_after_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[provider]\nmodel = 'a'\n");
        let first = file_mtime(&path).unwrap();
        // Filesystem timestamps can be coarse; force a visible difference.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, "[provider]\nmodel = 'b'\n").unwrap();
        let second = file_mtime(&path).unwrap();
        assert!(second >= first);
    }

    #[test]
    fn mtime_of_missing_file_is_none() {
        assert!(file_mtime(Path::new("/nonexistent/moatbot-config")).is_none());
    }
}
