//! File tools: read, write, edit, delete, list, search.
//!
//! Every operation passes through the [`PathGuard`] first; read-like outputs
//! additionally pass through the [`OutputSanitizer`] on the way back.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::security::{FileOp, OutputSanitizer, PathGuard};

use super::traits::{Tool, ToolContext, ToolResult};

/// Upper bound on lines returned by a single read.
const MAX_READ_LINES: usize = 2000;

/// Upper bound on matches returned by a search.
const MAX_SEARCH_MATCHES: usize = 100;

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolResult::err(format!("missing required argument '{key}'")))
}

// ─── FileReadTool ────────────────────────────────────────────────────────────

pub struct FileReadTool {
    guard: Arc<PathGuard>,
    sanitizer: Arc<OutputSanitizer>,
}

impl FileReadTool {
    pub fn new(guard: Arc<PathGuard>, sanitizer: Arc<OutputSanitizer>) -> Self {
        Self { guard, sanitizer }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file from your workspace. Use max_lines to limit output for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path inside your workspace." },
                "max_lines": {
                    "type": "integer",
                    "description": "Maximum number of lines to return.",
                    "minimum": 1
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let raw = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = match self.guard.check(ctx.user_id, raw, FileOp::Read, None) {
            Ok(p) => p,
            Err(reason) => return ToolResult::refused(reason),
        };

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("failed to read '{raw}': {e}")),
        };

        let cap = args
            .get("max_lines")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(MAX_READ_LINES);
        let output: String = contents
            .lines()
            .take(cap)
            .collect::<Vec<_>>()
            .join("\n");

        ToolResult::ok(self.sanitizer.sanitize(&output))
    }
}

// ─── FileWriteTool ───────────────────────────────────────────────────────────

pub struct FileWriteTool {
    guard: Arc<PathGuard>,
}

impl FileWriteTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in your workspace, creating or overwriting it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path":    { "type": "string", "description": "Path inside your workspace." },
                "content": { "type": "string", "description": "Content to write." }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let raw = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match required_str(&args, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };

        let path = match self
            .guard
            .check(ctx.user_id, raw, FileOp::Write, Some(content))
        {
            Ok(p) => p,
            Err(reason) => return ToolResult::refused(reason),
        };

        if let Some(parent) = path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return ToolResult::err(format!("failed to create parent dirs: {e}"));
        }
        match fs::write(&path, content) {
            Ok(()) => ToolResult::ok(format!("wrote {} bytes to '{raw}'", content.len())),
            Err(e) => ToolResult::err(format!("failed to write '{raw}': {e}")),
        }
    }
}

// ─── FileEditTool ────────────────────────────────────────────────────────────

pub struct FileEditTool {
    guard: Arc<PathGuard>,
}

impl FileEditTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of old_text with new_text in a workspace file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path":     { "type": "string" },
                "old_text": { "type": "string", "description": "Exact text to replace." },
                "new_text": { "type": "string", "description": "Replacement text." }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let raw = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let old_text = match required_str(&args, "old_text") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let new_text = match required_str(&args, "new_text") {
            Ok(s) => s,
            Err(e) => return e,
        };

        // The replacement text is what lands on disk; scan it like a write.
        let path = match self
            .guard
            .check(ctx.user_id, raw, FileOp::Edit, Some(new_text))
        {
            Ok(p) => p,
            Err(reason) => return ToolResult::refused(reason),
        };

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("failed to read '{raw}': {e}")),
        };
        let Some(index) = contents.find(old_text) else {
            return ToolResult::err(format!("old_text not found in '{raw}'"));
        };

        let mut updated = contents;
        updated.replace_range(index..index + old_text.len(), new_text);
        match fs::write(&path, updated) {
            Ok(()) => ToolResult::ok(format!("edited '{raw}'")),
            Err(e) => ToolResult::err(format!("failed to write '{raw}': {e}")),
        }
    }
}

// ─── FileDeleteTool ──────────────────────────────────────────────────────────

pub struct FileDeleteTool {
    guard: Arc<PathGuard>,
}

impl FileDeleteTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn description(&self) -> &str {
        "Delete a single file from your workspace. Directories cannot be deleted this way."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let raw = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = match self.guard.check(ctx.user_id, raw, FileOp::Delete, None) {
            Ok(p) => p,
            Err(reason) => return ToolResult::refused(reason),
        };

        if path.is_dir() {
            return ToolResult::err(format!("'{raw}' is a directory; use exec_command to manage directories"));
        }
        match fs::remove_file(&path) {
            Ok(()) => ToolResult::ok(format!("deleted '{raw}'")),
            Err(e) => ToolResult::err(format!("failed to delete '{raw}': {e}")),
        }
    }
}

// ─── FileListTool ────────────────────────────────────────────────────────────

pub struct FileListTool {
    guard: Arc<PathGuard>,
}

impl FileListTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List a directory in your workspace, optionally recursively."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path; '.' for the workspace root." },
                "recursive": { "type": "boolean" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let raw = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let recursive = args.get("recursive").and_then(Value::as_bool).unwrap_or(false);

        let path = match self.guard.check(ctx.user_id, raw, FileOp::List, None) {
            Ok(p) => p,
            Err(reason) => return ToolResult::refused(reason),
        };

        match collect_entries(&path, &path, recursive) {
            Ok(entries) if entries.is_empty() => ToolResult::ok("(empty)"),
            Ok(entries) => ToolResult::ok(entries.join("\n")),
            Err(e) => ToolResult::err(format!("failed to list '{raw}': {e}")),
        }
    }
}

fn collect_entries(base: &Path, dir: &Path, recursive: bool) -> std::io::Result<Vec<String>> {
    let mut result = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let display = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .display()
            .to_string();
        if path.is_dir() {
            result.push(format!("{display}/"));
            if recursive {
                result.extend(collect_entries(base, &path, true)?);
            }
        } else {
            result.push(display);
        }
    }
    result.sort();
    Ok(result)
}

// ─── FileSearchTool ──────────────────────────────────────────────────────────

pub struct FileSearchTool {
    guard: Arc<PathGuard>,
    sanitizer: Arc<OutputSanitizer>,
}

impl FileSearchTool {
    pub fn new(guard: Arc<PathGuard>, sanitizer: Arc<OutputSanitizer>) -> Self {
        Self { guard, sanitizer }
    }
}

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Search workspace files for a text pattern (case-insensitive). \
         Returns matching lines as path:line:text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Text to search for." },
                "path":    { "type": "string", "description": "Directory to search; '.' for the workspace root." }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let pattern = match required_str(&args, "pattern") {
            Ok(p) => p,
            Err(e) => return e,
        };
        if let Err(reason) = self.guard.check_search_pattern(pattern) {
            return ToolResult::refused(reason);
        }

        let raw = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = match self.guard.check(ctx.user_id, raw, FileOp::Search, None) {
            Ok(p) => p,
            Err(reason) => return ToolResult::refused(reason),
        };

        let needle = pattern.to_lowercase();
        let mut matches = Vec::new();
        search_dir(&path, &path, &needle, &mut matches);

        if matches.is_empty() {
            return ToolResult::ok("no matches");
        }
        let truncated = matches.len() > MAX_SEARCH_MATCHES;
        matches.truncate(MAX_SEARCH_MATCHES);
        let mut output = matches.join("\n");
        if truncated {
            output.push_str("\n… (truncated)");
        }
        ToolResult::ok(self.sanitizer.sanitize(&output))
    }
}

fn search_dir(base: &Path, dir: &Path, needle: &str, matches: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if matches.len() > MAX_SEARCH_MATCHES {
            return;
        }
        let path = entry.path();
        if path.is_dir() {
            search_dir(base, &path, needle, matches);
        } else if let Ok(contents) = fs::read_to_string(&path) {
            let display = path.strip_prefix(base).unwrap_or(&path).display().to_string();
            for (number, line) in contents.lines().enumerate() {
                if line.to_lowercase().contains(needle) {
                    matches.push(format!("{display}:{}:{}", number + 1, line.trim()));
                    if matches.len() > MAX_SEARCH_MATCHES {
                        return;
                    }
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::{channels::ChatKind, security::PatternStore, workspace::WorkspaceManager};

    struct Fixture {
        _dir: TempDir,
        guard: Arc<PathGuard>,
        sanitizer: Arc<OutputSanitizer>,
        ctx: ToolContext,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap().join("ws");
        let workspaces = Arc::new(WorkspaceManager::new(root.clone(), 4096).unwrap());
        let patterns = Arc::new(PatternStore::builtin().unwrap());
        let guard = Arc::new(PathGuard::new(patterns.clone(), root));
        let sanitizer = Arc::new(OutputSanitizer::new(patterns).unwrap());
        let workspace = workspaces.user_dir(42).unwrap();
        Fixture {
            _dir: dir,
            guard,
            sanitizer,
            ctx: ToolContext {
                user_id: 42,
                chat_id: 100,
                chat_kind: ChatKind::Private,
                workspace,
            },
        }
    }

    // ── Read ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_returns_contents() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("hello.txt"), "hello world").unwrap();
        let tool = FileReadTool::new(f.guard.clone(), f.sanitizer.clone());
        let r = tool.execute(&f.ctx, json!({"path": "hello.txt"})).await;
        assert!(r.success);
        assert_eq!(r.output.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn read_respects_max_lines() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("lines.txt"), "a\nb\nc\nd\ne").unwrap();
        let tool = FileReadTool::new(f.guard.clone(), f.sanitizer.clone());
        let r = tool
            .execute(&f.ctx, json!({"path": "lines.txt", "max_lines": 3}))
            .await;
        assert_eq!(r.output.unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn read_sanitizes_secrets_in_file() {
        let f = fixture();
        fs::write(
            f.ctx.workspace.join("config.txt"),
            "endpoint=https://x\nAPI_KEY=topsecret123",
        )
        .unwrap();
        let tool = FileReadTool::new(f.guard.clone(), f.sanitizer.clone());
        let r = tool.execute(&f.ctx, json!({"path": "config.txt"})).await;
        let out = r.output.unwrap();
        assert!(!out.contains("topsecret123"));
        assert!(out.contains("API_KEY=[REDACTED]"));
    }

    #[tokio::test]
    async fn read_outside_workspace_is_refused() {
        let f = fixture();
        let r = FileReadTool::new(f.guard.clone(), f.sanitizer.clone())
            .execute(&f.ctx, json!({"path": "/etc/hostname"}))
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().starts_with("🚫"));
    }

    #[tokio::test]
    async fn read_dotenv_is_refused() {
        let f = fixture();
        fs::write(f.ctx.workspace.join(".env"), "SECRET=1").unwrap();
        let r = FileReadTool::new(f.guard.clone(), f.sanitizer.clone())
            .execute(&f.ctx, json!({"path": ".env"}))
            .await;
        assert!(!r.success);
    }

    // ── Write / edit ────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_creates_file() {
        let f = fixture();
        let tool = FileWriteTool::new(f.guard.clone());
        let r = tool
            .execute(&f.ctx, json!({"path": "out.txt", "content": "written"}))
            .await;
        assert!(r.success);
        assert_eq!(
            fs::read_to_string(f.ctx.workspace.join("out.txt")).unwrap(),
            "written"
        );
    }

    #[tokio::test]
    async fn write_env_reader_script_is_refused() {
        let f = fixture();
        let tool = FileWriteTool::new(f.guard.clone());
        let r = tool
            .execute(
                &f.ctx,
                json!({"path": "leak.py", "content": "import os; print(os.environ)"}),
            )
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("content rejected"));
        assert!(!f.ctx.workspace.join("leak.py").exists());
    }

    #[tokio::test]
    async fn edit_replaces_first_occurrence() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("code.py"), "x = 1\nx = 1\n").unwrap();
        let tool = FileEditTool::new(f.guard.clone());
        let r = tool
            .execute(
                &f.ctx,
                json!({"path": "code.py", "old_text": "x = 1", "new_text": "x = 2"}),
            )
            .await;
        assert!(r.success);
        assert_eq!(
            fs::read_to_string(f.ctx.workspace.join("code.py")).unwrap(),
            "x = 2\nx = 1\n"
        );
    }

    #[tokio::test]
    async fn edit_missing_old_text_errors() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("code.py"), "y = 3\n").unwrap();
        let tool = FileEditTool::new(f.guard.clone());
        let r = tool
            .execute(
                &f.ctx,
                json!({"path": "code.py", "old_text": "absent", "new_text": "z"}),
            )
            .await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn edit_injecting_dangerous_code_is_refused() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("app.js"), "console.log('hi')\n").unwrap();
        let tool = FileEditTool::new(f.guard.clone());
        let r = tool
            .execute(
                &f.ctx,
                json!({"path": "app.js", "old_text": "console.log('hi')", "new_text": "console.log(process.env)"}),
            )
            .await;
        assert!(!r.success);
    }

    // ── Delete ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_removes_file() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("gone.txt"), "x").unwrap();
        let tool = FileDeleteTool::new(f.guard.clone());
        let r = tool.execute(&f.ctx, json!({"path": "gone.txt"})).await;
        assert!(r.success);
        assert!(!f.ctx.workspace.join("gone.txt").exists());
    }

    #[tokio::test]
    async fn delete_refuses_directories() {
        let f = fixture();
        fs::create_dir(f.ctx.workspace.join("subdir")).unwrap();
        let tool = FileDeleteTool::new(f.guard.clone());
        let r = tool.execute(&f.ctx, json!({"path": "subdir"})).await;
        assert!(!r.success);
    }

    // ── List ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn list_shows_relative_entries() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("a.txt"), "").unwrap();
        fs::create_dir(f.ctx.workspace.join("sub")).unwrap();
        fs::write(f.ctx.workspace.join("sub").join("b.txt"), "").unwrap();

        let tool = FileListTool::new(f.guard.clone());
        let r = tool.execute(&f.ctx, json!({"path": ".", "recursive": true})).await;
        let out = r.output.unwrap();
        assert!(out.contains("a.txt"));
        assert!(out.contains("sub/"));
        assert!(out.contains("sub/b.txt"), "got: {out}");
    }

    #[tokio::test]
    async fn list_etc_is_refused() {
        let f = fixture();
        let tool = FileListTool::new(f.guard.clone());
        let r = tool.execute(&f.ctx, json!({"path": "/etc"})).await;
        assert!(!r.success);
    }

    // ── Search ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn search_finds_matching_lines() {
        let f = fixture();
        fs::write(f.ctx.workspace.join("main.rs"), "fn main() {\n    run();\n}\n").unwrap();
        let tool = FileSearchTool::new(f.guard.clone(), f.sanitizer.clone());
        let r = tool.execute(&f.ctx, json!({"pattern": "fn main"})).await;
        let out = r.output.unwrap();
        assert!(out.contains("main.rs:1:"), "got: {out}");
    }

    #[tokio::test]
    async fn search_for_secrets_is_refused() {
        let f = fixture();
        let tool = FileSearchTool::new(f.guard.clone(), f.sanitizer.clone());
        let r = tool.execute(&f.ctx, json!({"pattern": "api_key"})).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("credentials"));
    }

    #[tokio::test]
    async fn search_with_no_matches_says_so() {
        let f = fixture();
        let tool = FileSearchTool::new(f.guard.clone(), f.sanitizer.clone());
        let r = tool.execute(&f.ctx, json!({"pattern": "nothing-here"})).await;
        assert_eq!(r.output.unwrap(), "no matches");
    }
}
