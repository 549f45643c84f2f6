//! Per-user workspaces and the operator activity log.
//!
//! `<root>/<userId>` is created lazily on first contact and never destroyed
//! automatically (the container is; the files are not).  `<root>/_shared` is
//! reserved for operator-only logs and is never accessible to any user's
//! agent — the command gate and path guard both enforce that.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;

use crate::UserId;

/// Name of the persistent per-workspace notes file.
pub const NOTES_FILE: &str = "MEMORY.md";

/// Name of the operator-only area under the workspace root.
pub const SHARED_DIR: &str = "_shared";

// ─── WorkspaceManager ────────────────────────────────────────────────────────

pub struct WorkspaceManager {
    root: PathBuf,
    notes_inject_bytes: usize,
}

impl WorkspaceManager {
    /// Create the manager, the root directory, and the `_shared` area.
    pub fn new(root: PathBuf, notes_inject_bytes: usize) -> Result<Self, String> {
        fs::create_dir_all(root.join(SHARED_DIR))
            .map_err(|e| format!("failed to create workspace root {}: {e}", root.display()))?;
        Ok(Self {
            root,
            notes_inject_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The user's workspace directory, created lazily.
    pub fn user_dir(&self, user_id: UserId) -> Result<PathBuf, String> {
        let dir = self.root.join(user_id.to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| format!("failed to create workspace {}: {e}", dir.display()))?;
        Ok(dir)
    }

    // ── Notes ────────────────────────────────────────────────────────────

    pub fn notes_path(&self, user_id: UserId) -> PathBuf {
        self.root.join(user_id.to_string()).join(NOTES_FILE)
    }

    /// Tail of the notes file, capped for prompt injection into the system
    /// prompt.  `None` when there are no notes.
    pub fn notes_tail(&self, user_id: UserId) -> Option<String> {
        let text = fs::read_to_string(self.notes_path(user_id)).ok()?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.len() <= self.notes_inject_bytes {
            return Some(trimmed.to_string());
        }
        // Keep the tail; older notes scroll off the prompt first.
        let mut start = trimmed.len() - self.notes_inject_bytes;
        while !trimmed.is_char_boundary(start) {
            start += 1;
        }
        Some(format!("…{}", &trimmed[start..]))
    }

    pub fn append_notes(&self, user_id: UserId, entry: &str) -> Result<(), String> {
        self.user_dir(user_id)?;
        let path = self.notes_path(user_id);
        let mut text = fs::read_to_string(&path).unwrap_or_default();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(entry.trim_end());
        text.push('\n');
        fs::write(&path, text).map_err(|e| format!("failed to write notes: {e}"))
    }

    pub fn read_notes(&self, user_id: UserId) -> String {
        fs::read_to_string(self.notes_path(user_id)).unwrap_or_default()
    }

    pub fn clear_notes(&self, user_id: UserId) -> Result<(), String> {
        let path = self.notes_path(user_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| format!("failed to clear notes: {e}"))?;
        }
        Ok(())
    }

    // ── Size probe ───────────────────────────────────────────────────────

    /// Recursive size of the user's workspace in bytes.
    pub fn dir_size(&self, user_id: UserId) -> u64 {
        fn walk(dir: &Path) -> u64 {
            let Ok(entries) = fs::read_dir(dir) else {
                return 0;
            };
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() {
                        walk(&path)
                    } else {
                        entry.metadata().map(|m| m.len()).unwrap_or(0)
                    }
                })
                .sum()
        }
        walk(&self.root.join(user_id.to_string()))
    }

    // ── Activity log ─────────────────────────────────────────────────────

    /// Append one row to the operator activity log
    /// (`<root>/_shared/activity.md`, append-only markdown table).
    pub fn log_activity(&self, user_id: UserId, action: &str, detail: &str) {
        let path = self.root.join(SHARED_DIR).join("activity.md");

        let mut excerpt: String = detail.chars().take(100).collect();
        if detail.chars().count() > 100 {
            excerpt.push('…');
        }
        let excerpt = excerpt.replace(['\n', '|'], " ");

        let header_needed = !path.exists();
        let mut row = String::new();
        if header_needed {
            row.push_str("| timestamp | user | action | detail |\n|---|---|---|---|\n");
        }
        row.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            user_id,
            action,
            excerpt
        ));

        let mut existing = fs::read_to_string(&path).unwrap_or_default();
        existing.push_str(&row);
        if let Err(e) = fs::write(&path, existing) {
            tracing::warn!(error = %e, "failed to append activity log");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
