//! Per-user sandbox manager.
//!
//! Guarantees that every agent-originating shell command runs inside a
//! user-scoped container whose only writable contact with the host is that
//! user's workspace directory and that user's port window.
//!
//! Lifecycle per user: `absent` → (first command) `provisioning` → `ready`,
//! back to `absent` on the inactivity TTL or at shutdown.  Containers carry
//! the deterministic name `sandbox_<userId>` so a stale container from a
//! crashed previous run is discovered and replaced rather than orphaned.

pub mod runtime;

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    UserId,
    config::SandboxConfig,
    workspace::WorkspaceManager,
};

pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, ExecOutput, SandboxError};

/// Shell packages installed into a fresh sandbox once, right after creation.
const TOOL_INSTALL: &str =
    "apk add --no-cache bash curl git python3 >/dev/null 2>&1 || true";

// ─── Port windows ────────────────────────────────────────────────────────────

/// The ten consecutive host ports of `user_id`:
/// `base + (uid mod 10) * 10` through `base + (uid mod 10) * 10 + 9`.
///
/// At most ten concurrent users get distinct windows; collisions are
/// acceptable because only one sandbox per window is alive at a time.
pub fn port_window(base: u16, user_id: UserId) -> Vec<u16> {
    let slot = (user_id.rem_euclid(10)) as u16;
    let first = base + slot * 10;
    (first..first + 10).collect()
}

/// Deterministic container name for a user.
pub fn container_name(user_id: UserId) -> String {
    format!("sandbox_{user_id}")
}

/// Busybox-compatible shell that kills every process older than
/// `timeout_secs`, sparing PID 1 (the sleep sentinel).  Process start time
/// comes from field 22 of `/proc/<pid>/stat` in clock ticks (HZ=100 on the
/// images we ship).
fn reaper_command(timeout_secs: u64) -> String {
    format!(
        "now=$(cut -d. -f1 /proc/uptime); \
         for p in /proc/[0-9]*; do \
           pid=${{p#/proc/}}; \
           [ \"$pid\" -le 1 ] && continue; \
           start=$(awk '{{print int($22/100)}}' \"$p/stat\" 2>/dev/null) || continue; \
           [ $((now - start)) -gt {timeout_secs} ] && kill -9 \"$pid\" 2>/dev/null; \
         done; true"
    )
}

// ─── SandboxManager ──────────────────────────────────────────────────────────

struct SandboxRecord {
    container_id: String,
    created_at: Instant,
    last_active: Instant,
}

pub struct SandboxManager {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    config: SandboxConfig,
    workspaces: Arc<WorkspaceManager>,
    records: Mutex<HashMap<UserId, SandboxRecord>>,
}

impl SandboxManager {
    pub fn new(
        runtime: Option<Arc<dyn ContainerRuntime>>,
        config: SandboxConfig,
        workspaces: Arc<WorkspaceManager>,
    ) -> Self {
        Self {
            runtime,
            config,
            workspaces,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a usable container runtime is attached.
    pub fn runtime_available(&self) -> bool {
        self.runtime.as_ref().is_some_and(|r| r.is_available())
    }

    /// Execute `command` in the user's sandbox, provisioning it on demand.
    ///
    /// Appends a workspace-size warning to the output when the directory has
    /// grown past its soft limit.
    pub async fn execute(&self, user_id: UserId, command: &str) -> Result<ExecOutput, SandboxError> {
        let command = self.rewrite_command(user_id, command);

        let Some(runtime) = self.runtime.clone() else {
            return self.host_fallback(user_id, &command).await;
        };

        let workspace = self
            .workspaces
            .user_dir(user_id)
            .map_err(SandboxError::Provision)?;
        let workdir = workspace.display().to_string();

        self.ensure_ready(user_id, &runtime, &workdir).await?;

        let timeout = Duration::from_secs(self.config.command_timeout_secs);
        let result = tokio::time::timeout(
            timeout,
            runtime.exec(&container_name(user_id), &workdir, &command),
        )
        .await
        .map_err(|_| SandboxError::Timeout(self.config.command_timeout_secs))??;

        self.mark_active(user_id).await;
        Ok(self.with_size_warning(user_id, result))
    }

    /// Periodic sweep: destroy sandboxes idle longer than the TTL, then
    /// reap orphaned background processes in the survivors.
    pub async fn sweep(&self) {
        let Some(runtime) = self.runtime.clone() else {
            return;
        };
        let ttl = Duration::from_secs(self.config.idle_ttl_secs);

        let expired: Vec<UserId> = {
            let records = self.records.lock().await;
            records
                .iter()
                .filter(|(_, r)| r.last_active.elapsed() > ttl)
                .map(|(uid, _)| *uid)
                .collect()
        };

        for user_id in expired {
            tracing::info!(user_id, "sandbox idle past TTL; destroying");
            self.destroy(user_id, &runtime).await;
        }

        let survivors: Vec<UserId> = self.records.lock().await.keys().copied().collect();
        for user_id in survivors {
            let workspace = self.workspaces.root().join(user_id.to_string());
            let reaper = reaper_command(self.config.background_timeout_secs);
            if let Err(e) = runtime
                .exec(
                    &container_name(user_id),
                    &workspace.display().to_string(),
                    &reaper,
                )
                .await
            {
                tracing::warn!(user_id, error = %e, "background reaper failed");
            }
        }
    }

    /// Destroy every live sandbox (system shutdown).
    pub async fn shutdown(&self) {
        let Some(runtime) = self.runtime.clone() else {
            return;
        };
        let users: Vec<UserId> = self.records.lock().await.keys().copied().collect();
        for user_id in users {
            self.destroy(user_id, &runtime).await;
        }
    }

    /// Whether the user currently has a live sandbox (used by `/status` and
    /// the tests).
    pub async fn has_sandbox(&self, user_id: UserId) -> bool {
        self.records.lock().await.contains_key(&user_id)
    }

    /// `(user, container id, age, idle time)` for every live sandbox.
    pub async fn status(&self) -> Vec<(UserId, String, Duration, Duration)> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(uid, r)| {
                (
                    *uid,
                    r.container_id.clone(),
                    r.created_at.elapsed(),
                    r.last_active.elapsed(),
                )
            })
            .collect()
    }

    // ── Internal ─────────────────────────────────────────────────────────

    async fn ensure_ready(
        &self,
        user_id: UserId,
        runtime: &Arc<dyn ContainerRuntime>,
        workspace: &str,
    ) -> Result<(), SandboxError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&user_id) {
            return Ok(());
        }

        let name = container_name(user_id);

        // A container with our name but no record is a leftover from a
        // crashed run: replace it rather than adopt it.
        if let Some(stale) = runtime.find_container(&name).await? {
            tracing::warn!(user_id, container = %stale, "replacing stale sandbox");
            runtime.remove(&name).await?;
        }

        let spec = ContainerSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            workspace: workspace.to_string(),
            ports: port_window(self.config.port_base, user_id),
            memory_limit_mb: self.config.memory_limit_mb,
            cpu_limit: self.config.cpu_limit,
            pids_limit: self.config.pids_limit,
        };

        let container_id = match runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                // Never leave a half-built container behind.
                let _ = runtime.remove(&name).await;
                return Err(SandboxError::Provision(e.to_string()));
            }
        };

        // One-time tool install; failures are tolerated (minimal images
        // still work with plain sh).
        let _ = runtime.exec(&name, workspace, TOOL_INSTALL).await;

        tracing::info!(user_id, container = %container_id, "sandbox provisioned");
        records.insert(
            user_id,
            SandboxRecord {
                container_id,
                created_at: Instant::now(),
                last_active: Instant::now(),
            },
        );
        Ok(())
    }

    async fn destroy(&self, user_id: UserId, runtime: &Arc<dyn ContainerRuntime>) {
        if let Err(e) = runtime.remove(&container_name(user_id)).await {
            tracing::warn!(user_id, error = %e, "sandbox removal failed");
        }
        self.records.lock().await.remove(&user_id);
    }

    async fn mark_active(&self, user_id: UserId) {
        if let Some(record) = self.records.lock().await.get_mut(&user_id) {
            record.last_active = Instant::now();
        }
    }

    /// `df` inside the container reports host-level numbers that confuse
    /// both agent and user; rewrite it to a workspace-scoped `du` with the
    /// advertised soft limit.
    fn rewrite_command(&self, user_id: UserId, command: &str) -> String {
        let trimmed = command.trim();
        if trimmed == "df" || trimmed.starts_with("df ") {
            let workspace = self.workspaces.root().join(user_id.to_string());
            return format!(
                "du -sh {} && echo 'workspace limit: {} MB (soft)'",
                workspace.display(),
                self.config.workspace_soft_limit_mb
            );
        }
        command.to_string()
    }

    fn with_size_warning(&self, user_id: UserId, mut result: ExecOutput) -> ExecOutput {
        let used = self.workspaces.dir_size(user_id);
        let limit = self.config.workspace_soft_limit_mb * 1024 * 1024;
        if used > limit {
            result.stdout.push_str(&format!(
                "\n⚠️ workspace size {} MB exceeds the {} MB soft limit — consider cleaning up",
                used / (1024 * 1024),
                self.config.workspace_soft_limit_mb
            ));
        }
        result
    }

    async fn host_fallback(
        &self,
        user_id: UserId,
        command: &str,
    ) -> Result<ExecOutput, SandboxError> {
        if !self.config.allow_host_fallback {
            return Err(SandboxError::Unavailable);
        }
        tracing::warn!(user_id, "container runtime unavailable; executing on host (degraded mode)");

        let workspace = self
            .workspaces
            .user_dir(user_id)
            .map_err(SandboxError::Provision)?;
        let command = command.to_string();

        let timeout = Duration::from_secs(self.config.command_timeout_secs);
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .current_dir(&workspace)
                .output(),
        )
        .await
        .map_err(|_| SandboxError::Timeout(self.config.command_timeout_secs))?
        .map_err(|e| SandboxError::Runtime(format!("failed to spawn: {e}")))?;

        let result = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        Ok(self.with_size_warning(user_id, result))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
