//! Container runtime abstraction for per-user sandboxes.
//!
//! Drives the `docker` CLI rather than the daemon socket, which avoids a
//! heavyweight client dependency and works in restricted environments where
//! the socket may not be accessible.  The CLI also demultiplexes the exec
//! stream into stdout and stderr for us.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("container runtime unavailable")]
    Unavailable,
    #[error("sandbox provisioning failed: {0}")]
    Provision(String),
    #[error("command timed out after {0}s")]
    Timeout(u64),
    #[error("runtime command failed: {0}")]
    Runtime(String),
}

// ─── ContainerSpec ───────────────────────────────────────────────────────────

/// Everything needed to create one user's sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Deterministic name (`sandbox_<userId>`), so a stale container from a
    /// crashed previous run can be discovered and replaced.
    pub name: String,
    pub image: String,
    /// Host workspace directory, mounted at the *same* path inside the
    /// container so host-side path checks and in-container paths agree.
    pub workspace: String,
    /// The user's ten consecutive host ports.
    pub ports: Vec<u16>,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub pids_limit: u64,
}

/// Demultiplexed result of one command inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ─── ContainerRuntime trait ──────────────────────────────────────────────────

/// Abstraction over the container engine.  One live implementation (Docker
/// CLI) plus test fakes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// CLI binary name (e.g. `"docker"`).
    fn binary_name(&self) -> &str;

    /// The binary resolves to a real file or is findable via `$PATH`.
    fn is_available(&self) -> bool;

    /// Cheap daemon liveness probe, used once at startup and by the sweep.
    async fn ping(&self) -> bool;

    /// Id of an existing container with exactly `name`, running or not.
    async fn find_container(&self, name: &str) -> Result<Option<String>, SandboxError>;

    /// Create and start a detached sandbox container; returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Run `command` inside the container with `workdir` as working directory.
    async fn exec(
        &self,
        name: &str,
        workdir: &str,
        command: &str,
    ) -> Result<ExecOutput, SandboxError>;

    /// Stop (short grace period) and remove the container.
    async fn remove(&self, name: &str) -> Result<(), SandboxError>;
}

// ─── DockerRuntime ───────────────────────────────────────────────────────────

/// Container runtime backed by the `docker` CLI.
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }

    /// Detect the docker binary on `$PATH`.
    pub fn detect() -> Option<Self> {
        which::which("docker")
            .ok()
            .map(|p| Self::new(p.to_string_lossy().into_owned()))
    }

    /// Build the complete `docker run` argument list from `spec`.
    ///
    /// Exposed as `pub` so unit tests can inspect the arguments without a
    /// live Docker daemon.
    pub fn build_run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            // Hard resource ceilings; swap equals memory, so no extra swap.
            format!("--memory={}m", spec.memory_limit_mb),
            format!("--memory-swap={}m", spec.memory_limit_mb),
            format!("--cpus={}", spec.cpu_limit),
            format!("--pids-limit={}", spec.pids_limit),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            // Bridged network (the default) with only this user's ports.
            "-v".to_string(),
            format!("{ws}:{ws}", ws = spec.workspace),
            "-w".to_string(),
            spec.workspace.clone(),
        ];

        for port in &spec.ports {
            args.push("-p".to_string());
            args.push(format!("{port}:{port}"));
        }

        args.push(spec.image.clone());
        // Long-sleep sentinel keeps the container alive between execs.
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    async fn output_of(&self, args: &[String]) -> Result<std::process::Output, SandboxError> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SandboxError::Runtime(format!("{} failed to start: {e}", self.binary)))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn binary_name(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        std::path::Path::new(&self.binary).is_file() || which::which(&self.binary).is_ok()
    }

    async fn ping(&self) -> bool {
        self.output_of(&["info".to_string(), "--format".to_string(), "{{.ID}}".to_string()])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn find_container(&self, name: &str) -> Result<Option<String>, SandboxError> {
        let out = self
            .output_of(&[
                "ps".to_string(),
                "-aq".to_string(),
                "--filter".to_string(),
                format!("name=^{name}$"),
            ])
            .await?;
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let out = self.output_of(&Self::build_run_args(spec)).await?;
        if !out.status.success() {
            return Err(SandboxError::Provision(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    async fn exec(
        &self,
        name: &str,
        workdir: &str,
        command: &str,
    ) -> Result<ExecOutput, SandboxError> {
        let out = self
            .output_of(&[
                "exec".to_string(),
                "-w".to_string(),
                workdir.to_string(),
                name.to_string(),
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ])
            .await?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code(),
        })
    }

    async fn remove(&self, name: &str) -> Result<(), SandboxError> {
        // Short grace period, then force-remove.
        let _ = self
            .output_of(&["stop".to_string(), "-t".to_string(), "3".to_string(), name.to_string()])
            .await;
        let out = self
            .output_of(&["rm".to_string(), "-f".to_string(), name.to_string()])
            .await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(SandboxError::Runtime(format!(
                "docker rm '{name}': {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
