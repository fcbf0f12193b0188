//! Drivers for the external tooling - hypervisor and container runtime
//!
//! Everything here shells out. Each call is bounded by a timeout so a hung
//! tool cannot wedge a lifecycle operation.

pub mod docker;
pub mod qemu;

pub use docker::{ContainerRuntime, ContainerSpec, DockerCli};
pub use qemu::{Hypervisor, QemuHypervisor, VmLaunch};

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Failure of a single external tool invocation
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {after:?}")]
    TimedOut { program: String, after: Duration },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unsupported(String),
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program args...` to completion, capturing output.
///
/// A non-zero exit is not an error here; callers decide. The child is killed
/// if the timeout fires.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    debug!("Running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(ToolError::TimedOut {
                program: program.to_string(),
                after: timeout,
            })
        }
    };

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`run_command`] but a non-zero exit becomes [`ToolError::NonZeroExit`]
pub async fn run_checked(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    let output = run_command(program, args, timeout).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ToolError::NonZeroExit {
            program: program.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
