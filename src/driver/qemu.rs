//! QEMU driver - Spawning and signalling hypervisor processes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::ToolError;
use crate::core::instance::DisplayMode;
use crate::platform::{self, Signalled};

/// Everything the hypervisor needs to boot a VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmLaunch {
    pub image_path: PathBuf,
    pub memory_mb: u32,
    pub cpu_count: u32,
    pub network_mode: String,
    pub seed_iso: Option<PathBuf>,
    pub display: DisplayMode,
}

impl VmLaunch {
    /// Command line arguments for `qemu-system-*`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hda".to_string(),
            self.image_path.display().to_string(),
            "-m".to_string(),
            self.memory_mb.to_string(),
            "-smp".to_string(),
            self.cpu_count.to_string(),
            "-net".to_string(),
            "nic".to_string(),
            "-net".to_string(),
            self.network_mode.clone(),
        ];

        match self.usable_seed() {
            Some(seed) => args.extend([
                "-cdrom".to_string(),
                seed.display().to_string(),
                "-boot".to_string(),
                "order=dc,menu=on".to_string(),
            ]),
            None => args.extend(["-boot".to_string(), "order=c,menu=on".to_string()]),
        }

        match self.display {
            DisplayMode::Graphical => args.extend(["-display".to_string(), "sdl".to_string()]),
            DisplayMode::Headless => args.push("-nographic".to_string()),
        }

        args
    }

    fn usable_seed(&self) -> Option<&Path> {
        let seed = self.seed_iso.as_deref()?;
        if seed.exists() {
            Some(seed)
        } else {
            warn!("Seed media {:?} not found, booting from disk only", seed);
            None
        }
    }
}

/// The VM half of the external tooling
#[async_trait]
pub trait Hypervisor: Send + Sync + 'static {
    /// Start a VM process and return its pid
    async fn launch(&self, vm: &VmLaunch) -> Result<u32, ToolError>;

    /// Ask the VM process to shut down
    async fn terminate(&self, pid: u32) -> Result<Signalled, ToolError>;

    /// Whether the process is still alive
    async fn is_running(&self, pid: u32) -> Result<bool, ToolError>;
}

/// Launches `qemu-system-*` as a detached child process.
///
/// Child handles are kept until the VM is terminated. An unreaped child
/// keeps its pid, so a signal can never hit a process that reused it.
pub struct QemuHypervisor {
    binary: String,
    /// Live VM processes by pid
    children: Mutex<HashMap<u32, Child>>,
}

impl QemuHypervisor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn children(&self) -> MutexGuard<'_, HashMap<u32, Child>> {
        self.children.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a child we own has exited, reaping it if so
fn has_exited(pid: u32, child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(Some(status)) => {
            info!("VM process {} exited with {}", pid, status);
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!("Failed to poll VM process {}: {}", pid, e);
            false
        }
    }
}

#[async_trait]
impl Hypervisor for QemuHypervisor {
    async fn launch(&self, vm: &VmLaunch) -> Result<u32, ToolError> {
        let args = vm.to_args();
        info!("Launching {} {}", self.binary, args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Detach from our session so the VM outlives the terminal
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.binary.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| ToolError::NonZeroExit {
            program: self.binary.clone(),
            code: None,
            stderr: "process exited immediately".to_string(),
        })?;
        self.children().insert(pid, child);
        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<Signalled, ToolError> {
        let mut children = self.children();
        let Some(child) = children.get_mut(&pid) else {
            warn!("VM process {} is not one of ours, not signalling", pid);
            return Ok(Signalled::AlreadyGone);
        };

        let outcome = if has_exited(pid, child) {
            Signalled::AlreadyGone
        } else {
            platform::terminate_process(pid).map_err(|source| ToolError::Signal { pid, source })?
        };
        if outcome == Signalled::AlreadyGone {
            warn!("VM process {} already exited", pid);
        }
        // Dropping the handle hands the exiting process to tokio's reaper
        children.remove(&pid);
        Ok(outcome)
    }

    async fn is_running(&self, pid: u32) -> Result<bool, ToolError> {
        {
            let mut children = self.children();
            if let Some(child) = children.get_mut(&pid) {
                if has_exited(pid, child) {
                    children.remove(&pid);
                    return Ok(false);
                }
            }
        }
        tokio::task::spawn_blocking(move || platform::is_process_running(pid))
            .await
            .map_err(|e| ToolError::Unsupported(format!("liveness probe panicked: {e}")))
    }
}
