//! In-memory stand-ins for the hypervisor and container runtime

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::instance::{Backing, Instance, InstanceId, ResourceRequest};
use super::settings::Settings;
use super::AppState;
use crate::driver::{ContainerRuntime, ContainerSpec, Hypervisor, ToolError, VmLaunch};
use crate::platform::Signalled;

fn tool_failure(program: &str) -> ToolError {
    ToolError::NonZeroExit {
        program: program.to_string(),
        code: Some(1),
        stderr: format!("simulated {program} failure"),
    }
}

/// Records every call and fails on demand
#[derive(Default)]
pub struct FakeHypervisor {
    next_pid: AtomicU32,
    pub fail_launch: AtomicBool,
    pub fail_terminate: AtomicBool,
    pub launches: Mutex<Vec<VmLaunch>>,
    pub terminated: Mutex<Vec<u32>>,
    /// pids that have exited behind our back
    pub exited: Mutex<Vec<u32>>,
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn launch(&self, vm: &VmLaunch) -> Result<u32, ToolError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(ToolError::Spawn {
                program: "qemu".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no qemu"),
            });
        }
        self.launches.lock().unwrap().push(vm.clone());
        Ok(10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn terminate(&self, pid: u32) -> Result<Signalled, ToolError> {
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(ToolError::Signal {
                pid,
                source: std::io::Error::from_raw_os_error(1),
            });
        }
        self.terminated.lock().unwrap().push(pid);
        Ok(Signalled::Delivered)
    }

    async fn is_running(&self, pid: u32) -> Result<bool, ToolError> {
        let terminated = self.terminated.lock().unwrap().contains(&pid);
        let exited = self.exited.lock().unwrap().contains(&pid);
        Ok(!terminated && !exited)
    }
}

/// Tracks container state by name and fails on demand
#[derive(Default)]
pub struct FakeRuntime {
    pub fail_run: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_inspect: AtomicBool,
    /// Every invocation as `verb name`
    pub calls: Mutex<Vec<String>>,
    /// name -> running
    pub containers: Mutex<HashMap<String, bool>>,
}

impl FakeRuntime {
    pub fn calls_for(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .count()
    }

    /// Forget a container, as if someone ran `docker rm -f` behind our back
    pub fn vanish(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    fn record(&self, verb: &str, name: &str) {
        self.calls.lock().unwrap().push(format!("{verb} {name}"));
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<String, ToolError> {
        self.record("run", &spec.name);
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(tool_failure("docker"));
        }
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), true);
        Ok(format!("sha256-{}", spec.name))
    }

    async fn stop(&self, name: &str) -> Result<Signalled, ToolError> {
        self.record("stop", name);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(tool_failure("docker"));
        }
        match self.containers.lock().unwrap().get_mut(name) {
            Some(running) => {
                *running = false;
                Ok(Signalled::Delivered)
            }
            None => Ok(Signalled::AlreadyGone),
        }
    }

    async fn start(&self, name: &str) -> Result<(), ToolError> {
        self.record("start", name);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(tool_failure("docker"));
        }
        if let Some(running) = self.containers.lock().unwrap().get_mut(name) {
            *running = true;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ToolError> {
        self.record("rm", name);
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(tool_failure("docker"));
        }
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<Option<bool>, ToolError> {
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(tool_failure("docker"));
        }
        Ok(self.containers.lock().unwrap().get(name).copied())
    }
}

/// Settings whose VM images point at real files under `image_dir`
pub fn settings_with_images(image_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    for (os, path) in settings.vm_images.iter_mut() {
        let file = image_dir.join(format!("{os}.img"));
        std::fs::write(&file, b"").unwrap();
        *path = file;
    }
    settings
}

/// A fully wired app state over fake drivers
pub struct Harness {
    pub state: AppState,
    pub hypervisor: Arc<FakeHypervisor>,
    pub runtime: Arc<FakeRuntime>,
    _images: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let images = tempfile::tempdir().unwrap();
        let settings = settings_with_images(images.path());
        let hypervisor = Arc::new(FakeHypervisor::default());
        let runtime = Arc::new(FakeRuntime::default());
        let state = AppState::with_drivers(&settings, hypervisor.clone(), runtime.clone());
        Self {
            state,
            hypervisor,
            runtime,
            _images: images,
        }
    }
}

pub fn resources(memory_mb: u32, cpu_count: u32) -> ResourceRequest {
    ResourceRequest {
        memory_mb,
        cpu_count,
        disk_gb: None,
    }
}

/// A running container record that was never provisioned
pub fn container_record() -> Instance {
    let id = InstanceId::new();
    Instance::new(
        id,
        "Ubuntu",
        resources(512, 1),
        Duration::from_secs(60),
        Backing::Container {
            image: "ubuntu:latest".into(),
            container_name: format!("container_{}", id.short()),
            container_id: "abc".into(),
        },
    )
}
