//! The canonical pattern library.
//!
//! Five ordered lists drive the whole security core: *blocked* command
//! patterns, *dangerous* command patterns, prompt-*injection* patterns,
//! *sensitive* file-name patterns, *secret-value* shapes, plus a blocklist of
//! outbound URL patterns and a *dangerous-code* list for file-write content
//! scanning.
//!
//! Ordering matters: the classifier walks the blocked list to completion
//! before consulting the dangerous list, and within each list the first match
//! wins and supplies the reason.  The lists are immutable for one load
//! generation; [`PatternStore`] swaps in a fresh generation when the backing
//! `patterns.toml` changes on disk (cheap mtime check, no restart needed).

use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::file_mtime;

// ─── Types ───────────────────────────────────────────────────────────────────

/// A compiled command pattern with the reason returned on match.
#[derive(Debug, Clone)]
pub struct CommandPattern {
    pub regex: Regex,
    pub reason: String,
}

/// One immutable generation of every pattern list.
#[derive(Debug)]
pub struct PatternSet {
    /// Commands that never run and never prompt.  Evaluated first.
    pub blocked: Vec<CommandPattern>,
    /// Commands that run only after explicit user approval.
    pub dangerous: Vec<CommandPattern>,
    /// Prompt-injection phrasings (English and Russian).
    pub injection: Vec<Regex>,
    /// File basenames that must never be read or written.
    pub sensitive_files: Vec<Regex>,
    /// Code idioms rejected in file-write content.
    pub dangerous_code: Vec<CommandPattern>,
    /// Raw secret-value shapes redacted from every tool output.
    pub secret_values: Vec<Regex>,
    /// Outbound URLs the fetch tool refuses.
    pub blocked_urls: Vec<Regex>,
}

/// Serde shape of an operator-supplied `patterns.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PatternFile {
    pub blocked: Vec<PatternEntry>,
    pub dangerous: Vec<PatternEntry>,
    pub injection: Vec<String>,
    pub sensitive_files: Vec<String>,
    pub dangerous_code: Vec<PatternEntry>,
    pub secret_values: Vec<String>,
    pub blocked_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub pattern: String,
    pub reason: String,
}

// ─── Built-in lists ──────────────────────────────────────────────────────────

/// Blocked: never runs, never prompts.  First match wins; list order is load
/// order and must be preserved across reloads.
const BLOCKED: &[(&str, &str)] = &[
    (
        r"(?:^|[;&|(]\s*)(?:env|printenv)\b",
        "Leaks all environment variables and operator secrets",
    ),
    (r"/proc/(?:self|\d+)/environ", "Reads process environment from /proc"),
    (
        r"\b(?:cat|less|more|head|tail|grep|awk|sed|strings|xxd|od|vi|vim|nano|cp|mv)\b[^|;&\n]*\.(?:env\b|npmrc\b|pypirc\b|netrc\b)",
        "Reads credential files",
    ),
    (
        r"\bid_(?:rsa|ed25519|ecdsa|dsa)\b|\.ssh/",
        "Touches SSH key material",
    ),
    (r"/run/secrets", "Reads mounted container secrets"),
    (
        r"docker\.sock|\bdocker\b[^\n]*(?:--privileged|-v\s*/(?:\s|:))",
        "Reaches for the container runtime socket",
    ),
    (
        r"\bcurl\b[^\n]*\s(?:-d|--data(?:-\w+)?|-F|--form|--upload-file|-T)\b",
        "Uploads data to an external host",
    ),
    (r"\bwget\b[^\n]*--post-(?:data|file)", "Uploads data to an external host"),
    (
        r"\b(?:nslookup|dig|host)\b[^\n]*\$",
        "DNS query with interpolated data (exfiltration channel)",
    ),
    (
        r"\bsudo\b|\bsu\s+(?:-\s*)?(?:root\b|$)|\bdoas\b",
        "Privilege escalation inside the sandbox",
    ),
    (
        r"\bchmod\s+(?:-[a-zA-Z]+\s+)*[234567][0-7]{3}\b|\bchmod\s+(?:-[a-zA-Z]+\s+)*[ugoa]*\+[rwx]*s",
        "Sets setuid/setgid bits",
    ),
    (
        r"169\.254\.169\.254|metadata\.google\.internal|\bmetadata\.internal\b",
        "Queries a cloud metadata endpoint",
    ),
    (
        r"\b(?:xmrig|minerd|cpuminer|cgminer|bfgminer|ethminer|nbminer|t-rex)\b",
        "Crypto mining binary",
    ),
    (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "Fork bomb"),
    (
        r"\byes\b[^\n]*>\s*/|\bdd\b[^\n]*if=/dev/(?:zero|urandom)[^\n]*\bcount=\d{4,}",
        "Resource exhaustion bomb",
    ),
    (
        r"\bln\s+-[a-zA-Z]*s[a-zA-Z]*\s+/(?:etc|root|home|proc|sys|dev|var)\b",
        "Symlinks a host system directory into the workspace",
    ),
    (
        r"\b(?:cat|ls|head|tail|grep|find|more|less)\b[^\n]*\s/(?:etc/(?:passwd|shadow|sudoers)|root\b)",
        "Reads host system files",
    ),
    (
        r"\|\s*(?:base64|xxd|od|openssl\s+enc)\b",
        "Encodes output (smuggles secrets past redaction)",
    ),
    (
        r"\becho\b[^\n]*\$\{?[A-Z0-9_]*(?:TOKEN|SECRET|API_?KEY|PASSWORD|CREDENTIAL)[A-Z0-9_]*\b",
        "Prints a secret-bearing environment variable",
    ),
];

/// Dangerous: runs only after explicit approval (collapses to blocked in
/// group chats).
const DANGEROUS: &[(&str, &str)] = &[
    (
        r"\brm\s+(?:-[a-zA-Z]*[rf][a-zA-Z]*\s+)+",
        "Recursive or forced delete",
    ),
    (
        r"\bchmod\s+(?:-[a-zA-Z]+\s+)*(?:777|a\+rwx)\b",
        "World-writable permissions",
    ),
    (r"\bdd\b[^\n]*\bof=/dev/", "Writes directly to a disk device"),
    (r"\b(?:fdisk|parted|sfdisk|gdisk|partprobe)\b", "Partition table tool"),
    (r"\bmkfs(?:\.[a-z0-9]+)?\b", "Filesystem format"),
    (
        r"\bgit\s+push\b[^\n]*(?:--force\b|-f\b)|\bgit\s+reset\s+--hard\b|\bgit\s+clean\s+-[a-zA-Z]*f",
        "Destructive git operation",
    ),
    (r"(?:^|[^\w])DROP\s+(?:TABLE|DATABASE)\b", "Drops a database object"),
    (
        r"\b(?:shutdown|reboot|halt|poweroff)\b|\binit\s+0\b",
        "System shutdown",
    ),
    (
        r"\bnc\b[^\n]*\s(?:-e|-c)\s|\bbash\s+-i\b[^\n]*(?:/dev/tcp/|>&)|/dev/tcp/\d",
        "Reverse shell idiom",
    ),
    (
        r"\b(?:curl|wget)\b[^\n]*\|\s*(?:ba|z|da)?sh\b",
        "Pipes a downloaded script into a shell",
    ),
    (
        r"\bkubectl\s+delete\b[^\n]*(?:--all\b|-A\b|--all-namespaces\b)",
        "Kubernetes mass delete",
    ),
    (r"\bcrontab\s+-r\b", "Wipes the crontab"),
    (r"\btruncate\s+-s\s*0\b", "Truncates files to zero length"),
];

/// Prompt-injection phrasings.  Case-insensitive; English and Russian because
/// the patterns were learned from both.
const INJECTION: &[&str] = &[
    r"(?:ignore|disregard|forget|override)\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier|your)\s+(?:instructions?|prompts?|rules)",
    r"(?:игнорируй|забудь|отмени|не\s+учитывай)\s+(?:все\s+)?(?:предыдущие|прошлые|свои)\s+(?:инструкции|указания|правила)",
    r"\[\s*(?:system|admin|developer|root)\s*\]",
    r"\[\s*(?:система|администратор|разработчик)\s*\]",
    r"\bdan\s+(?:mode|prompt|jailbreak)\b|\bdo\s+anything\s+now\b",
    r"\bjailbreak\b|\bджейлбрейк\b",
    r"developer\s+mode\s+(?:enabled|activated|on)|режим\s+разработчика",
    r"(?:show|reveal|print|output|repeat|display)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+)?(?:prompt|instructions)",
    r"(?:покажи|выведи|повтори|раскрой)\s+(?:мне\s+)?(?:свой|свои|системный)\s+(?:промпт|инструкции)",
    r"what\s+(?:is|are)\s+your\s+(?:system\s+prompt|instructions|rules)",
    r"you\s+are\s+now\s+(?:a|an|the)\b",
    r"теперь\s+ты\s+(?:больше\s+не|не)?\s*\w+",
    r"pretend\s+(?:to\s+be|you\s+are)\s+(?:a\s+)?(?:different|another|unrestricted)",
    r"act\s+as\s+(?:root|admin|system|the\s+operator)",
    r"new\s+instructions?\s*:|новые\s+инструкции\s*:",
    r"(?:register|add|install|define)\s+(?:a\s+)?new\s+tool\b",
];

/// File basenames that must never be read or written by the agent.
const SENSITIVE_FILES: &[&str] = &[
    r"^\.env(?:$|\.)",
    r"^credentials",
    r"^secrets?(?:$|\.)",
    r"^id_(?:rsa|ed25519|ecdsa|dsa)",
    r"\.(?:pem|key|p12|pfx)$",
    r"^\.npmrc$",
    r"^\.pypirc$",
    r"^\.netrc$",
    r"^authorized_keys$",
    r"(?:oauth|token)[^/]*\.json$",
];

/// Code idioms rejected in file-write content — blocking direct reads of
/// secrets is useless if the agent can write a script that does it.
const DANGEROUS_CODE: &[(&str, &str)] = &[
    (
        r"\bos\.environ\b|\bprocess\.env\b|\bSystem\.getenv\b|\bENV\[|[^\w]getenv\s*\(|\bstd::env::var",
        "Reads environment variables",
    ),
    (
        r"\bdotenv\b|load_dotenv|require\(['\x22]dotenv",
        "Loads a dotenv credential file",
    ),
    (
        r"\brequests\.post\s*\([^\n]*(?:data|json|files)\s*=|fetch\s*\([^\n]*method\s*:\s*['\x22]POST",
        "HTTP POST with a payload",
    ),
    (
        r"socket\.[^\n]*connect[^\n]*(?:exec|subprocess|spawn)|pty\.spawn|/dev/tcp/",
        "Reverse shell idiom",
    ),
    (
        r"open\s*\(\s*['\x22]/etc/|open\s*\(\s*['\x22][^'\x22]*\.env['\x22]|readFileSync\s*\(\s*['\x22][^'\x22]*\.env",
        "Reads system or credential files",
    ),
];

/// Raw secret-value shapes.  Matches are redacted down to a 4-char prefix.
const SECRET_VALUES: &[&str] = &[
    // Provider-specific key shapes.
    r"sk-[A-Za-z0-9_-]{20,}",
    r"tvly-[A-Za-z0-9_-]{16,}",
    r"gh[pousr]_[A-Za-z0-9]{36,}",
    r"xox[baprs]-[A-Za-z0-9-]{10,}",
    r"AKIA[0-9A-Z]{16}",
    // Bot-token shape: digits, colon, 35 base62 chars.
    r"\b\d{8,10}:[A-Za-z0-9_-]{35}\b",
    // Authorization header values.
    r"(?:Bearer|Basic)\s+[A-Za-z0-9._~+/=-]{16,}",
    // IP:port endpoints.
    r"\b(?:\d{1,3}\.){3}\d{1,3}:\d{2,5}\b",
];

/// Outbound URLs the fetch tool refuses.
const BLOCKED_URLS: &[&str] = &[
    r"^https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1\])(?::|/|$)",
    r"^https?://169\.254\.169\.254",
    r"^https?://metadata\.google\.internal",
    r"^https?://(?:10|192\.168)\.\d+\.\d+\.?\d*",
    r"^https?://172\.(?:1[6-9]|2\d|3[01])\.\d+\.\d+",
    r"^file://",
];

// ─── Compilation ─────────────────────────────────────────────────────────────

/// Compile a case-insensitive pattern.  Built-in patterns are literals, so a
/// compile failure is a programming error caught by the tests below.
fn rx(pattern: &str) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| format!("invalid pattern '{pattern}': {e}"))
}

fn compile_pairs(pairs: &[(&str, &str)]) -> Result<Vec<CommandPattern>, String> {
    pairs
        .iter()
        .map(|(p, reason)| {
            Ok(CommandPattern {
                regex: rx(p)?,
                reason: (*reason).to_string(),
            })
        })
        .collect()
}

fn compile_list(patterns: &[&str]) -> Result<Vec<Regex>, String> {
    patterns.iter().map(|p| rx(p)).collect()
}

fn compile_entries(entries: &[PatternEntry]) -> Result<Vec<CommandPattern>, String> {
    entries
        .iter()
        .map(|e| {
            Ok(CommandPattern {
                regex: rx(&e.pattern)?,
                reason: e.reason.clone(),
            })
        })
        .collect()
}

fn compile_strings(patterns: &[String]) -> Result<Vec<Regex>, String> {
    patterns.iter().map(|p| rx(p)).collect()
}

impl PatternSet {
    /// The built-in generation compiled from the literal tables above.
    pub fn builtin() -> Result<Self, String> {
        Ok(Self {
            blocked: compile_pairs(BLOCKED)?,
            dangerous: compile_pairs(DANGEROUS)?,
            injection: compile_list(INJECTION)?,
            sensitive_files: compile_list(SENSITIVE_FILES)?,
            dangerous_code: compile_pairs(DANGEROUS_CODE)?,
            secret_values: compile_list(SECRET_VALUES)?,
            blocked_urls: compile_list(BLOCKED_URLS)?,
        })
    }

    /// Compile an operator-supplied [`PatternFile`].  Empty sections fall
    /// back to the built-in lists so a partial override file works.
    pub fn from_file(file: &PatternFile) -> Result<Self, String> {
        let builtin = Self::builtin()?;
        Ok(Self {
            blocked: if file.blocked.is_empty() {
                builtin.blocked
            } else {
                compile_entries(&file.blocked)?
            },
            dangerous: if file.dangerous.is_empty() {
                builtin.dangerous
            } else {
                compile_entries(&file.dangerous)?
            },
            injection: if file.injection.is_empty() {
                builtin.injection
            } else {
                compile_strings(&file.injection)?
            },
            sensitive_files: if file.sensitive_files.is_empty() {
                builtin.sensitive_files
            } else {
                compile_strings(&file.sensitive_files)?
            },
            dangerous_code: if file.dangerous_code.is_empty() {
                builtin.dangerous_code
            } else {
                compile_entries(&file.dangerous_code)?
            },
            secret_values: if file.secret_values.is_empty() {
                builtin.secret_values
            } else {
                compile_strings(&file.secret_values)?
            },
            blocked_urls: if file.blocked_urls.is_empty() {
                builtin.blocked_urls
            } else {
                compile_strings(&file.blocked_urls)?
            },
        })
    }

    // ── Lookups ──────────────────────────────────────────────────────────

    /// First matching blocked pattern, if any.  The blocked list is walked to
    /// completion before the dangerous list is ever consulted.
    pub fn first_blocked(&self, command: &str) -> Option<&str> {
        self.blocked
            .iter()
            .find(|p| p.regex.is_match(command))
            .map(|p| p.reason.as_str())
    }

    /// First matching dangerous pattern, if any.
    pub fn first_dangerous(&self, command: &str) -> Option<&str> {
        self.dangerous
            .iter()
            .find(|p| p.regex.is_match(command))
            .map(|p| p.reason.as_str())
    }

    /// Whether `text` matches any injection pattern.
    pub fn matches_injection(&self, text: &str) -> bool {
        self.injection.iter().any(|r| r.is_match(text))
    }

    /// Whether `basename` names a sensitive file.
    pub fn is_sensitive_file(&self, basename: &str) -> bool {
        self.sensitive_files.iter().any(|r| r.is_match(basename))
    }

    /// First matching dangerous-code pattern in file content.
    pub fn first_dangerous_code(&self, content: &str) -> Option<&str> {
        self.dangerous_code
            .iter()
            .find(|p| p.regex.is_match(content))
            .map(|p| p.reason.as_str())
    }

    /// Whether the URL is on the outbound blocklist.
    pub fn is_blocked_url(&self, url: &str) -> bool {
        self.blocked_urls.iter().any(|r| r.is_match(url))
    }
}

// ─── PatternStore ────────────────────────────────────────────────────────────

/// Hot-reloading holder of the current [`PatternSet`] generation.
///
/// When constructed with a file path, `current()` performs a cheap mtime
/// check and recompiles the set if the file changed; a file that fails to
/// parse keeps the previous generation live (an operator typo must not drop
/// the guard rails).
pub struct PatternStore {
    path: Option<PathBuf>,
    state: RwLock<Generation>,
}

struct Generation {
    mtime: Option<SystemTime>,
    set: Arc<PatternSet>,
}

impl PatternStore {
    /// Store backed by the built-in lists only.
    pub fn builtin() -> Result<Self, String> {
        Ok(Self {
            path: None,
            state: RwLock::new(Generation {
                mtime: None,
                set: Arc::new(PatternSet::builtin()?),
            }),
        })
    }

    /// Store backed by `patterns.toml` at `path` (falls back to built-ins
    /// while the file is absent).
    pub fn from_path(path: PathBuf) -> Result<Self, String> {
        let store = Self::builtin()?;
        let store = Self {
            path: Some(path),
            state: store.state,
        };
        store.reload_if_stale();
        Ok(store)
    }

    /// Current generation, after the staleness check.
    pub fn current(&self) -> Arc<PatternSet> {
        self.reload_if_stale();
        match self.state.read() {
            Ok(g) => Arc::clone(&g.set),
            // A poisoned lock still holds a valid generation.
            Err(poisoned) => Arc::clone(&poisoned.into_inner().set),
        }
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

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| toml::from_str::<PatternFile>(&text).map_err(|e| e.to_string()))
            .and_then(|file| PatternSet::from_file(&file));

        match parsed {
            Ok(set) => {
                if let Ok(mut state) = self.state.write() {
                    state.mtime = on_disk;
                    state.set = Arc::new(set);
                    tracing::info!(path = %path.display(), "pattern lists reloaded");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "pattern reload failed; keeping previous generation");
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
