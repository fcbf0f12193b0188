//! Container runtime driver - Docker-compatible CLI

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{run_checked, run_command, CommandOutput, ToolError};
use crate::platform::Signalled;

/// Parameters for `run -d`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub memory_mb: u32,
    pub cpu_count: u32,
    /// Long-lived no-op command that keeps the container up
    pub keepalive: Vec<String>,
}

impl ContainerSpec {
    pub fn to_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--memory".to_string(),
            format!("{}m", self.memory_mb),
            "--cpus".to_string(),
            self.cpu_count.to_string(),
            self.image.clone(),
        ];
        args.extend(self.keepalive.iter().cloned());
        args
    }
}

/// The container half of the external tooling
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Create and start a detached container, returning the runtime's id for it
    async fn run(&self, spec: &ContainerSpec) -> Result<String, ToolError>;

    /// Stop a container. One the runtime no longer knows is `AlreadyGone`.
    async fn stop(&self, name: &str) -> Result<Signalled, ToolError>;

    async fn start(&self, name: &str) -> Result<(), ToolError>;

    /// Force-remove a container, running or not
    async fn remove(&self, name: &str) -> Result<(), ToolError>;

    /// `Ok(None)` when the runtime does not know the container at all
    async fn is_running(&self, name: &str) -> Result<Option<bool>, ToolError>;
}

/// Drives `docker` (or a CLI-compatible runtime such as `podman`)
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn failure(&self, output: CommandOutput) -> ToolError {
        ToolError::NonZeroExit {
            program: self.binary.clone(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        }
    }
}

/// Docker and podman both report unknown containers as "No such container"
fn is_unknown_container(output: &CommandOutput) -> bool {
    output.stderr.to_ascii_lowercase().contains("no such")
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &ContainerSpec) -> Result<String, ToolError> {
        let output = run_checked(&self.binary, &spec.to_run_args(), self.timeout).await?;
        let container_id = output.stdout.trim().to_string();
        info!(name = %spec.name, container_id = %container_id, "container started");
        Ok(container_id)
    }

    async fn stop(&self, name: &str) -> Result<Signalled, ToolError> {
        let output = run_command(&self.binary, &Self::args(&["stop", name]), self.timeout).await?;
        if output.success() {
            info!(name, "container stopped");
            return Ok(Signalled::Delivered);
        }
        if is_unknown_container(&output) {
            warn!(name, "container already gone");
            return Ok(Signalled::AlreadyGone);
        }
        Err(self.failure(output))
    }

    async fn start(&self, name: &str) -> Result<(), ToolError> {
        run_checked(&self.binary, &Self::args(&["start", name]), self.timeout).await?;
        info!(name, "container started");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ToolError> {
        run_checked(&self.binary, &Self::args(&["rm", "-f", name]), self.timeout).await?;
        debug!(name, "container removed");
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<Option<bool>, ToolError> {
        let output = run_command(
            &self.binary,
            &Self::args(&["inspect", "-f", "{{.State.Running}}", name]),
            self.timeout,
        )
        .await?;
        if !output.success() {
            if is_unknown_container(&output) {
                return Ok(None);
            }
            return Err(self.failure(output));
        }
        Ok(Some(output.stdout.trim() == "true"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_pass_limits_and_keepalive() {
        let spec = ContainerSpec {
            name: "container_1a2b3c4d".into(),
            image: "ubuntu:latest".into(),
            memory_mb: 512,
            cpu_count: 1,
            keepalive: vec!["tail".into(), "-f".into(), "/dev/null".into()],
        };
        assert_eq!(
            spec.to_run_args(),
            vec![
                "run", "-d", "--name", "container_1a2b3c4d", "--memory", "512m", "--cpus", "1",
                "ubuntu:latest", "tail", "-f", "/dev/null",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_runtime_surfaces_stderr() {
        // `false` ignores its arguments and exits 1, standing in for a broken runtime
        let runtime = DockerCli::new("false", Duration::from_secs(5));
        let err = runtime.stop("container_1a2b3c4d").await.unwrap_err();
        assert!(matches!(err, ToolError::NonZeroExit { code: Some(1), .. }));
    }

    /// A fake `docker` that knows no containers at all
    #[cfg(unix)]
    fn forgetful_runtime(dir: &std::path::Path) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("docker");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$1\" in\n\
               run) echo deadbeef ;;\n\
               *) echo \"Error response from daemon: No such container: $2\" >&2; exit 1 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(script.display().to_string(), Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_of_unknown_container_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = forgetful_runtime(dir.path());

        assert_eq!(
            runtime.stop("container_1a2b3c4d").await.unwrap(),
            Signalled::AlreadyGone
        );
        assert_eq!(runtime.is_running("container_1a2b3c4d").await.unwrap(), None);
        // start cannot bring back what is not there
        assert!(runtime.start("container_1a2b3c4d").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_returns_trimmed_stdout() {
        // `echo` prints its arguments, which is enough to exercise parsing
        let runtime = DockerCli::new("echo", Duration::from_secs(5));
        let spec = ContainerSpec {
            name: "c".into(),
            image: "img".into(),
            memory_mb: 64,
            cpu_count: 1,
            keepalive: vec![],
        };
        let id = runtime.run(&spec).await.unwrap();
        assert_eq!(id, "run -d --name c --memory 64m --cpus 1 img");
    }
}
