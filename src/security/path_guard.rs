//! File-path guard: applied to every file operation the agent performs
//! (read, write, edit, delete, list, search).
//!
//! Check order:
//! 1. lexical confinement — the resolved path stays inside the caller's
//!    workspace, is not the workspace root, `_shared`, or a foreign tenant,
//! 2. sensitive basename list,
//! 3. real-path (symlink-resolved) confinement, with a specific reason when
//!    a link points into a host system directory,
//! 4. for write/edit, content scanning against the dangerous-code list,
//! 5. hard-blocked listing directories,
//! 6. secret-seeking grep patterns — otherwise grep is a read primitive for
//!    credentials.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use regex::RegexBuilder;

use crate::{UserId, security::patterns::PatternStore};

/// The file operation being guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    Edit,
    Delete,
    List,
    Search,
}

/// Host directories a symlink target must never reach.
const SYSTEM_PREFIXES: &[&str] = &["/etc", "/root", "/home", "/proc", "/sys", "/dev", "/var"];

/// Directories that are never listable, regardless of how they were reached.
const BLOCKED_LIST_DIRS: &[&str] = &[
    "/etc", "/root", "/.ssh", "/proc", "/sys", "/dev", "/boot", "/var/log", "/var/run",
];

/// Grep patterns that themselves name secret-like terms.
const SECRET_GREP: &str = r"password|token|api.?key|credential|private.?key|secret|парол";

// ─── PathGuard ───────────────────────────────────────────────────────────────

pub struct PathGuard {
    patterns: Arc<PatternStore>,
    root: PathBuf,
}

impl PathGuard {
    pub fn new(patterns: Arc<PatternStore>, workspace_root: PathBuf) -> Self {
        Self {
            patterns,
            root: workspace_root,
        }
    }

    /// Workspace directory of `user_id`.
    pub fn workspace(&self, user_id: UserId) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    /// Run every applicable check for `raw` and return the resolved path the
    /// caller must use.  `content` is scanned for write/edit operations.
    pub fn check(
        &self,
        user_id: UserId,
        raw: &str,
        op: FileOp,
        content: Option<&str>,
    ) -> Result<PathBuf, String> {
        if raw.contains('\0') {
            return Err("path contains a null byte".into());
        }
        if raw.contains("/.ssh") || raw.starts_with(".ssh") {
            return Err("SSH key material is off limits".into());
        }

        let workspace = self.workspace(user_id);
        let resolved = normalize(&workspace, Path::new(raw));

        // 1. Lexical confinement.
        self.confine(user_id, &workspace, &resolved)?;

        // 2. Sensitive basename.
        if let Some(name) = resolved.file_name().map(|n| n.to_string_lossy())
            && self.patterns.current().is_sensitive_file(&name)
        {
            return Err(format!("'{name}' is a protected credential file"));
        }

        // 3. Real path with symlinks fully resolved.
        if resolved.exists() {
            let real = std::fs::canonicalize(&resolved)
                .map_err(|e| format!("cannot resolve '{}': {e}", resolved.display()))?;
            if !real.starts_with(&workspace) {
                for prefix in SYSTEM_PREFIXES {
                    if real.starts_with(prefix) {
                        return Err(format!(
                            "symbolic link points into the host directory {prefix}"
                        ));
                    }
                }
                return Err("real path escapes the workspace".into());
            }
        }

        // 4. Content scan for write/edit.
        if matches!(op, FileOp::Write | FileOp::Edit)
            && let Some(body) = content
            && let Some(reason) = self.patterns.current().first_dangerous_code(body)
        {
            return Err(format!("content rejected: {reason}"));
        }

        // 5. Hard-blocked listing directories (defense in depth on the raw
        // path; confinement already rejects anything outside the workspace).
        if op == FileOp::List {
            for dir in BLOCKED_LIST_DIRS {
                if raw == *dir || raw.starts_with(&format!("{dir}/")) {
                    return Err(format!("listing {dir} is not allowed"));
                }
            }
        }

        Ok(resolved)
    }

    /// Reject grep patterns that hunt for secrets.
    pub fn check_search_pattern(&self, pattern: &str) -> Result<(), String> {
        let secret_terms = RegexBuilder::new(SECRET_GREP)
            .case_insensitive(true)
            .build()
            .map_err(|e| format!("guard pattern: {e}"))?;
        if secret_terms.is_match(pattern) {
            return Err("search patterns naming credentials are not allowed".into());
        }
        Ok(())
    }

    // ── Internal ─────────────────────────────────────────────────────────

    fn confine(&self, user_id: UserId, workspace: &Path, resolved: &Path) -> Result<(), String> {
        if resolved == self.root {
            return Err("the workspace root itself is off limits".into());
        }
        if resolved.starts_with(self.root.join("_shared")) {
            return Err("the _shared area is operator-only".into());
        }
        if !resolved.starts_with(workspace) {
            // A path under another tenant's directory gets the specific reason.
            if let Ok(rest) = resolved.strip_prefix(&self.root)
                && let Some(first) = rest.components().next()
                && first.as_os_str().to_string_lossy().parse::<i64>().is_ok_and(|id| id != user_id)
            {
                return Err("cannot access another user's workspace".into());
            }
            return Err("path escapes the workspace".into());
        }
        Ok(())
    }
}

/// Resolve `raw` against `workspace` and normalize it lexically, without
/// touching the filesystem.  `..` components pop; popping above the
/// filesystem root saturates (the confinement check rejects the result).
fn normalize(workspace: &Path, raw: &Path) -> PathBuf {
    let base = if raw.is_absolute() {
        PathBuf::new()
    } else {
        workspace.to_path_buf()
    };

    let mut out = base;
    for component in raw.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        guard: PathGuard,
        root: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        // Canonicalize so the real-path checks compare like with like even
        // when the temp dir itself sits behind a symlink.
        let root = dir.path().canonicalize().unwrap().join("ws");
        std::fs::create_dir_all(root.join("42")).unwrap();
        std::fs::create_dir_all(root.join("7")).unwrap();
        std::fs::create_dir_all(root.join("_shared")).unwrap();
        let guard = PathGuard::new(
            Arc::new(PatternStore::builtin().unwrap()),
            root.clone(),
        );
        Fixture {
            _dir: dir,
            guard,
            root,
        }
    }

    // ── Confinement ─────────────────────────────────────────────────────

    #[test]
    fn relative_path_resolves_into_workspace() {
        let f = fixture();
        let p = f.guard.check(42, "notes/today.md", FileOp::Read, None).unwrap();
        assert!(p.starts_with(f.root.join("42")));
    }

    #[test]
    fn absolute_path_inside_workspace_is_fine() {
        let f = fixture();
        let target = f.root.join("42").join("file.txt");
        let p = f
            .guard
            .check(42, &target.display().to_string(), FileOp::Read, None)
            .unwrap();
        assert_eq!(p, target);
    }

    #[test]
    fn other_tenant_is_rejected_with_specific_reason() {
        let f = fixture();
        let target = f.root.join("7").join("secrets");
        let err = f
            .guard
            .check(42, &target.display().to_string(), FileOp::List, None)
            .unwrap_err();
        assert!(err.contains("another user"), "got: {err}");
    }

    #[test]
    fn workspace_root_itself_is_rejected() {
        let f = fixture();
        let err = f
            .guard
            .check(42, &f.root.display().to_string(), FileOp::List, None)
            .unwrap_err();
        assert!(err.contains("workspace root"));
    }

    #[test]
    fn shared_area_is_rejected() {
        let f = fixture();
        let target = f.root.join("_shared").join("activity.md");
        let err = f
            .guard
            .check(42, &target.display().to_string(), FileOp::Read, None)
            .unwrap_err();
        assert!(err.contains("operator-only"));
    }

    #[test]
    fn parent_traversal_is_normalized_and_rejected() {
        let f = fixture();
        let err = f
            .guard
            .check(42, "../7/file.txt", FileOp::Read, None)
            .unwrap_err();
        assert!(err.contains("another user"), "got: {err}");
    }

    #[test]
    fn traversal_to_etc_is_rejected() {
        let f = fixture();
        let err = f
            .guard
            .check(42, "/etc/passwd", FileOp::Read, None)
            .unwrap_err();
        assert!(err.contains("escapes"), "got: {err}");
    }

    // ── Sensitive basenames ─────────────────────────────────────────────

    #[test]
    fn dotenv_is_rejected_even_inside_workspace() {
        let f = fixture();
        let err = f.guard.check(42, ".env", FileOp::Read, None).unwrap_err();
        assert!(err.contains("protected credential file"));
    }

    #[test]
    fn pem_is_rejected() {
        let f = fixture();
        assert!(f.guard.check(42, "certs/server.pem", FileOp::Write, Some("x")).is_err());
    }

    #[test]
    fn ssh_paths_are_rejected_outright() {
        let f = fixture();
        assert!(f.guard.check(42, "/home/user/.ssh/id_rsa", FileOp::Read, None).is_err());
        assert!(f.guard.check(42, ".ssh/config", FileOp::Read, None).is_err());
    }

    // ── Symlink resolution ──────────────────────────────────────────────

    #[cfg(unix)]
    #[test]
    fn symlink_into_etc_is_rejected_with_specific_reason() {
        let f = fixture();
        let link = f.root.join("42").join("passwd_link");
        std::os::unix::fs::symlink("/etc/passwd", &link).unwrap();
        let err = f
            .guard
            .check(42, &link.display().to_string(), FileOp::Read, None)
            .unwrap_err();
        assert!(err.contains("/etc"), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_to_other_tenant_is_rejected() {
        let f = fixture();
        let foreign = f.root.join("7").join("data.txt");
        std::fs::write(&foreign, "theirs").unwrap();
        let link = f.root.join("42").join("sneaky");
        std::os::unix::fs::symlink(&foreign, &link).unwrap();
        let err = f
            .guard
            .check(42, &link.display().to_string(), FileOp::Read, None)
            .unwrap_err();
        assert!(err.contains("escapes"), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn honest_file_passes_real_path_check() {
        let f = fixture();
        let file = f.root.join("42").join("ok.txt");
        std::fs::write(&file, "fine").unwrap();
        assert!(
            f.guard
                .check(42, &file.display().to_string(), FileOp::Read, None)
                .is_ok()
        );
    }

    // ── Content scanning ────────────────────────────────────────────────

    #[test]
    fn write_with_environ_read_is_rejected() {
        let f = fixture();
        let err = f
            .guard
            .check(
                42,
                "leak.py",
                FileOp::Write,
                Some("import os\nprint(os.environ['SECRET'])"),
            )
            .unwrap_err();
        assert!(err.contains("content rejected"));
    }

    #[test]
    fn write_with_plain_code_is_fine() {
        let f = fixture();
        assert!(
            f.guard
                .check(42, "ok.py", FileOp::Write, Some("print('hello')"))
                .is_ok()
        );
    }

    #[test]
    fn read_never_scans_content() {
        let f = fixture();
        // Content only applies to write/edit; a read with Some(..) passes.
        assert!(
            f.guard
                .check(42, "a.txt", FileOp::Read, Some("process.env"))
                .is_ok()
        );
    }

    // ── Listing blocklist ───────────────────────────────────────────────

    #[test]
    fn listing_proc_is_rejected() {
        let f = fixture();
        assert!(f.guard.check(42, "/proc", FileOp::List, None).is_err());
        assert!(f.guard.check(42, "/var/log/nginx", FileOp::List, None).is_err());
    }

    // ── Search patterns ─────────────────────────────────────────────────

    #[test]
    fn secret_seeking_grep_is_rejected() {
        let f = fixture();
        for pattern in ["password", "API_KEY", "api-key", "private key", "Credential"] {
            assert!(
                f.guard.check_search_pattern(pattern).is_err(),
                "'{pattern}' should be rejected"
            );
        }
    }

    #[test]
    fn ordinary_grep_is_fine() {
        let f = fixture();
        assert!(f.guard.check_search_pattern("fn main").is_ok());
        assert!(f.guard.check_search_pattern("TODO").is_ok());
    }
}
