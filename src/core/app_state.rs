//! Application state - The entry point front ends talk to

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::error::Result;
use super::instance::{Instance, InstanceId, InstanceRequest, InstanceStatus};
use super::lifecycle::LifecycleController;
use super::monitor::{spawn_expiry_monitor, ExpiryMonitor};
use super::provisioner::{ContainerProvisioner, Provisioner, VmProvisioner};
use super::registry::Registry;
use super::settings::Settings;
use crate::driver::{ContainerRuntime, DockerCli, Hypervisor, QemuHypervisor};

/// Central application state.
///
/// Cheap to clone; every clone shares the same registry. All instances handed
/// out are snapshots.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    provisioner: Arc<Provisioner>,
    controller: Arc<LifecycleController>,
    monitor: Arc<ExpiryMonitor>,
}

impl AppState {
    /// Wire up the real QEMU and container runtime drivers
    pub fn new(settings: &Settings) -> Self {
        let hypervisor = Arc::new(QemuHypervisor::new(settings.hypervisor_binary.clone()));
        let runtime = Arc::new(DockerCli::new(
            settings.container_runtime_binary.clone(),
            settings.command_timeout(),
        ));
        Self::with_drivers(settings, hypervisor, runtime)
    }

    /// Wire up arbitrary drivers
    pub fn with_drivers(
        settings: &Settings,
        hypervisor: Arc<dyn Hypervisor>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let provisioner = Arc::new(Provisioner {
            vm: VmProvisioner::new(registry.clone(), hypervisor.clone(), settings),
            container: ContainerProvisioner::new(registry.clone(), runtime.clone(), settings),
        });
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            hypervisor.clone(),
            runtime.clone(),
            provisioner.clone(),
        ));
        let monitor = Arc::new(ExpiryMonitor::new(
            registry.clone(),
            controller.clone(),
            hypervisor,
            runtime,
        ));

        Self {
            registry,
            provisioner,
            controller,
            monitor,
        }
    }

    /// Provision a new VM or container
    pub async fn create(&self, request: &InstanceRequest) -> Result<Instance> {
        self.provisioner.create(request).await
    }

    pub fn get(&self, id: InstanceId) -> Result<Instance> {
        self.registry.get(id)
    }

    pub fn list_running(&self) -> Vec<Instance> {
        self.registry.list_by_status(InstanceStatus::Running)
    }

    pub fn list_all(&self) -> Vec<Instance> {
        self.registry.list_all()
    }

    pub async fn stop(&self, id: InstanceId) -> Result<Instance> {
        self.controller.stop(id).await
    }

    pub async fn start(&self, id: InstanceId) -> Result<Instance> {
        self.controller.start(id).await
    }

    pub async fn delete(&self, id: InstanceId) -> Result<Instance> {
        self.controller.delete(id).await
    }

    pub async fn reinstall(&self, id: InstanceId) -> Result<Instance> {
        self.controller.reinstall(id).await
    }

    /// One expiry pass; returns the instances stopped by it
    pub async fn check_expired(&self) -> Vec<Instance> {
        self.monitor.check_expired().await
    }

    /// One reconciliation pass; returns the instances found dead
    pub async fn reconcile(&self) -> Vec<Instance> {
        self.monitor.reconcile().await
    }

    /// Run reconciliation and expiry on a fixed cadence in the background
    pub fn spawn_expiry_monitor(&self, interval: Duration) -> JoinHandle<()> {
        spawn_expiry_monitor(self.monitor.clone(), interval)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn monitor(&self) -> &ExpiryMonitor {
        &self.monitor
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Get count of running instances
    pub fn running_count(&self) -> usize {
        self.registry.ids_with_status(InstanceStatus::Running).len()
    }

    /// Get count of all instances
    pub fn total_count(&self) -> usize {
        self.registry.len()
    }
}
