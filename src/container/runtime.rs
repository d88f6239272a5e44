// Container runtimes - docker CLI sandbox and host-process fallback
#![allow(dead_code)]

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::error::ContainerError;
use super::ContainerConfig;

/// Runtime-opaque handle to a provisioned container.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub name: String,
}

/// The seam between the container manager and the engine that actually runs
/// sandboxes. `DockerCli` is the real implementation; `ProcessRuntime` runs
/// the shell directly on the host for environments without an engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container for a conversation, mounting `work_dir`
    /// read-write at `/mnt`.
    async fn create(
        &self,
        conversation_id: &str,
        work_dir: &Path,
    ) -> Result<ContainerHandle, ContainerError>;

    /// Restart a previously stopped container.
    async fn start(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    /// Spawn the long-lived interactive shell for this container with piped
    /// stdio.
    async fn open_shell(
        &self,
        handle: &ContainerHandle,
        work_dir: &Path,
    ) -> Result<Child, ContainerError>;

    /// SIGINT the foreground children of the shell process.
    async fn signal_foreground(
        &self,
        handle: &ContainerHandle,
        shell_pid: u32,
    ) -> Result<(), ContainerError>;

    /// Whether the configured image is available to run.
    async fn image_present(&self) -> Result<bool, ContainerError>;
}

/// Sandbox runtime driving the `docker` CLI.
pub struct DockerCli {
    image: String,
    memory_limit: String,
    cpu_limit: f64,
    host_network: bool,
    container_prefix: String,
}

impl DockerCli {
    pub fn new(config: &ContainerConfig) -> Self {
        Self {
            image: config.image.clone(),
            memory_limit: config.memory_limit.clone(),
            cpu_limit: config.cpu_limit,
            host_network: config.host_network,
            container_prefix: "berth-agent-".to_string(),
        }
    }

    fn container_name(&self, conversation_id: &str) -> String {
        format!("{}{}", self.container_prefix, conversation_id)
    }

    async fn docker(&self, args: &[&str]) -> Result<std::process::Output, ContainerError> {
        debug!(args = ?args, "docker");
        let output = Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ContainerError::Runtime(format!("failed to run docker: {}", e)))?;
        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create(
        &self,
        conversation_id: &str,
        work_dir: &Path,
    ) -> Result<ContainerHandle, ContainerError> {
        let name = self.container_name(conversation_id);

        // A stale container from a previous run blocks the name.
        let _ = self.docker(&["rm", "-f", &name]).await;

        let mount = format!("{}:/mnt:rw", work_dir.display());
        let cpus = format!("{}", self.cpu_limit);
        let agent_id = format!("AGENT_ID={}", conversation_id);

        let mut args: Vec<&str> = vec![
            "run",
            "-d",
            "--name",
            &name,
            "-e",
            &agent_id,
            "-e",
            "AGENT_WORK_DIR=/mnt",
            "-v",
            &mount,
            "--memory",
            &self.memory_limit,
            "--cpus",
            &cpus,
            "--read-only",
            "--tmpfs",
            "/tmp/agent:rw,noexec,nosuid,size=100m",
            "--tmpfs",
            "/home/agent/.cache:rw,noexec,nosuid,size=50m",
            "--security-opt",
            "no-new-privileges",
            "--cap-drop",
            "ALL",
            "--cap-add",
            "CHOWN",
            "--cap-add",
            "DAC_OVERRIDE",
            "--cap-add",
            "SETGID",
            "--cap-add",
            "SETUID",
            "--cap-add",
            "NET_RAW",
            "--cap-add",
            "NET_BIND_SERVICE",
            "--ulimit",
            "nofile=1024:2048",
            "--ulimit",
            "nproc=512:1024",
        ];
        if self.host_network {
            args.push("--network");
            args.push("host");
        }
        args.push(&self.image);
        // Keep the container alive; commands go through the exec'd shell.
        args.extend_from_slice(&["tail", "-f", "/dev/null"]);

        let output = self.docker(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if stderr.contains("No such image") || stderr.contains("Unable to find image") {
                return Err(ContainerError::ImageMissing(self.image.clone()));
            }
            return Err(ContainerError::Runtime(format!(
                "docker run failed: {}",
                stderr.trim()
            )));
        }

        Ok(ContainerHandle { name })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let output = self.docker(&["start", &handle.name]).await?;
        if !output.status.success() {
            return Err(ContainerError::Runtime(format!(
                "docker start failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let output = self.docker(&["stop", "-t", "10", &handle.name]).await?;
        if !output.status.success() {
            return Err(ContainerError::Runtime(format!(
                "docker stop failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let output = self.docker(&["rm", "-f", &handle.name]).await?;
        if !output.status.success() {
            warn!(
                container = %handle.name,
                error = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker rm failed"
            );
        }
        Ok(())
    }

    async fn open_shell(
        &self,
        handle: &ContainerHandle,
        _work_dir: &Path,
    ) -> Result<Child, ContainerError> {
        let child = Command::new("docker")
            .args([
                "exec",
                "-i",
                "-u",
                "agent",
                "-w",
                "/mnt",
                &handle.name,
                "bash",
                "--noprofile",
                "--norc",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::Runtime(format!("docker exec failed: {}", e)))?;
        Ok(child)
    }

    async fn signal_foreground(
        &self,
        handle: &ContainerHandle,
        shell_pid: u32,
    ) -> Result<(), ContainerError> {
        let pid = shell_pid.to_string();
        // pkill exits non-zero when nothing matched; that is fine here.
        let _ = self
            .docker(&["exec", &handle.name, "pkill", "-INT", "-P", &pid])
            .await?;
        Ok(())
    }

    async fn image_present(&self) -> Result<bool, ContainerError> {
        let output = self.docker(&["image", "inspect", &self.image]).await?;
        Ok(output.status.success())
    }
}

/// Degraded runtime: the stateful shell runs directly on the host with no
/// isolation beyond the per-conversation working directory. Used where no
/// container engine is available, and as the test substrate.
pub struct ProcessRuntime;

impl ProcessRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    async fn create(
        &self,
        conversation_id: &str,
        _work_dir: &Path,
    ) -> Result<ContainerHandle, ContainerError> {
        Ok(ContainerHandle {
            name: conversation_id.to_string(),
        })
    }

    async fn start(&self, _handle: &ContainerHandle) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn stop(&self, _handle: &ContainerHandle) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn remove(&self, _handle: &ContainerHandle) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn open_shell(
        &self,
        _handle: &ContainerHandle,
        work_dir: &Path,
    ) -> Result<Child, ContainerError> {
        let child = Command::new("/bin/bash")
            .args(["--noprofile", "--norc"])
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::Runtime(format!("failed to spawn bash: {}", e)))?;
        Ok(child)
    }

    async fn signal_foreground(
        &self,
        _handle: &ContainerHandle,
        shell_pid: u32,
    ) -> Result<(), ContainerError> {
        let _ = Command::new("pkill")
            .args(["-INT", "-P", &shell_pid.to_string()])
            .stdin(Stdio::null())
            .output()
            .await;
        Ok(())
    }

    async fn image_present(&self) -> Result<bool, ContainerError> {
        Ok(true)
    }
}
