//! Provisioning - Creating VMs and containers and registering them

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::error::{LifecycleError, Result};
use super::instance::{
    Backing, DisplayMode, Instance, InstanceId, InstanceKind, InstanceRequest, LaunchOptions,
    ResourceRequest,
};
use super::registry::Registry;
use super::settings::Settings;
use crate::driver::{ContainerRuntime, ContainerSpec, Hypervisor, VmLaunch};

/// Boots VMs from configured disk images
pub struct VmProvisioner {
    registry: Arc<Registry>,
    hypervisor: Arc<dyn Hypervisor>,
    images: BTreeMap<String, PathBuf>,
    network_mode: String,
}

impl VmProvisioner {
    pub fn new(
        registry: Arc<Registry>,
        hypervisor: Arc<dyn Hypervisor>,
        settings: &Settings,
    ) -> Self {
        Self {
            registry,
            hypervisor,
            images: settings.vm_images.clone(),
            network_mode: settings.vm_network_mode.clone(),
        }
    }

    pub async fn create(
        &self,
        os_choice: &str,
        resources: ResourceRequest,
        allotted_runtime: Duration,
        display: DisplayMode,
        seed_iso: Option<PathBuf>,
    ) -> Result<Instance> {
        let image_path = self
            .images
            .get(os_choice)
            .ok_or_else(|| LifecycleError::UnsupportedOs {
                kind: InstanceKind::Vm,
                os: os_choice.to_string(),
            })?
            .clone();
        if !image_path.exists() {
            return Err(LifecycleError::ImageNotFound(image_path));
        }

        let launch = VmLaunch {
            image_path: image_path.clone(),
            memory_mb: resources.memory_mb,
            cpu_count: resources.cpu_count,
            network_mode: self.network_mode.clone(),
            seed_iso: seed_iso.clone(),
            display,
        };
        let pid = self
            .hypervisor
            .launch(&launch)
            .await
            .map_err(LifecycleError::Launch)?;

        let instance = Instance::new(
            InstanceId::new(),
            os_choice,
            resources,
            allotted_runtime,
            Backing::Vm {
                image_path,
                pid,
                display,
                seed_iso,
            },
        );

        if let Err(e) = self.registry.insert(instance.clone()) {
            error!("Failed to register VM {}, terminating pid {}", instance.id, pid);
            if let Err(kill_err) = self.hypervisor.terminate(pid).await {
                warn!("Rollback of pid {} failed: {}", pid, kill_err);
            }
            return Err(e);
        }

        info!(id = %instance.id, pid, os = os_choice, "VM created");
        Ok(instance)
    }
}

/// Runs detached, resource-limited containers
pub struct ContainerProvisioner {
    registry: Arc<Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    images: BTreeMap<String, String>,
    keepalive: Vec<String>,
}

impl ContainerProvisioner {
    pub fn new(
        registry: Arc<Registry>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: &Settings,
    ) -> Self {
        Self {
            registry,
            runtime,
            images: settings.container_images.clone(),
            keepalive: settings.keepalive_command.clone(),
        }
    }

    /// Container name derived from the instance id
    pub fn container_name(id: InstanceId) -> String {
        format!("container_{}", id.short())
    }

    pub async fn create(
        &self,
        os_choice: &str,
        resources: ResourceRequest,
        allotted_runtime: Duration,
    ) -> Result<Instance> {
        let image = self
            .images
            .get(os_choice)
            .ok_or_else(|| LifecycleError::UnsupportedOs {
                kind: InstanceKind::Container,
                os: os_choice.to_string(),
            })?
            .clone();

        let id = InstanceId::new();
        let name = Self::container_name(id);

        // A stale container with the same name must never block creation
        if let Err(e) = self.runtime.remove(&name).await {
            tracing::debug!("Pre-create cleanup of {} ignored: {}", name, e);
        }

        let spec = ContainerSpec {
            name: name.clone(),
            image: image.clone(),
            memory_mb: resources.memory_mb,
            cpu_count: resources.cpu_count,
            keepalive: self.keepalive.clone(),
        };
        let container_id = self
            .runtime
            .run(&spec)
            .await
            .map_err(LifecycleError::Creation)?;

        let instance = Instance::new(
            id,
            os_choice,
            resources,
            allotted_runtime,
            Backing::Container {
                image,
                container_name: name.clone(),
                container_id,
            },
        );

        if let Err(e) = self.registry.insert(instance.clone()) {
            error!("Failed to register container {}, removing it", name);
            if let Err(rm_err) = self.runtime.remove(&name).await {
                warn!("Rollback of container {} failed: {}", name, rm_err);
            }
            return Err(e);
        }

        info!(id = %instance.id, container = %name, os = os_choice, "container created");
        Ok(instance)
    }
}

/// Dispatches a request to the matching provisioner
pub struct Provisioner {
    pub vm: VmProvisioner,
    pub container: ContainerProvisioner,
}

impl Provisioner {
    pub async fn create(&self, request: &InstanceRequest) -> Result<Instance> {
        match &request.launch {
            LaunchOptions::Vm { display, seed_iso } => {
                self.vm
                    .create(
                        &request.os_choice,
                        request.resources,
                        request.allotted_runtime,
                        *display,
                        seed_iso.clone(),
                    )
                    .await
            }
            LaunchOptions::Container => {
                self.container
                    .create(
                        &request.os_choice,
                        request.resources,
                        request.allotted_runtime,
                    )
                    .await
            }
        }
    }
}
