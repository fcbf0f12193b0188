//! Lifecycle controller - Stop, start, delete and reinstall
//!
//! Every operation follows the same discipline: claim the record by moving it
//! into a transient status under the registry lock, run the external command
//! with the lock released, then commit the final status. A record that is
//! already claimed is reported as `Busy`, so two callers never issue the same
//! external command twice.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::error::{LifecycleError, Result};
use super::instance::{Backing, Instance, InstanceId, InstanceStatus, StopReason};
use super::provisioner::Provisioner;
use super::registry::Registry;
use crate::driver::{ContainerRuntime, Hypervisor, ToolError};

pub struct LifecycleController {
    registry: Arc<Registry>,
    hypervisor: Arc<dyn Hypervisor>,
    runtime: Arc<dyn ContainerRuntime>,
    provisioner: Arc<Provisioner>,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<Registry>,
        hypervisor: Arc<dyn Hypervisor>,
        runtime: Arc<dyn ContainerRuntime>,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self {
            registry,
            hypervisor,
            runtime,
            provisioner,
        }
    }

    /// Stop an instance on request
    pub async fn stop(&self, id: InstanceId) -> Result<Instance> {
        self.stop_with_reason(id, StopReason::Manual).await
    }

    /// Stop an instance, recording why.
    ///
    /// Stopping an already stopped instance succeeds without touching the
    /// external tooling. On failure the status goes back to `Running`.
    pub async fn stop_with_reason(&self, id: InstanceId, reason: StopReason) -> Result<Instance> {
        match self.stop_if_running(id, reason).await? {
            Some(stopped) => Ok(stopped),
            None => self.registry.get(id),
        }
    }

    /// Stop an instance only if this call is the one that moves it out of
    /// `Running`. Returns `None` when it was already stopped.
    pub async fn stop_if_running(
        &self,
        id: InstanceId,
        reason: StopReason,
    ) -> Result<Option<Instance>> {
        let instance = match self.registry.transition(
            id,
            &[InstanceStatus::Running],
            InstanceStatus::Stopping,
        ) {
            Ok(instance) => instance,
            Err(LifecycleError::Busy {
                status: InstanceStatus::Stopped,
                ..
            }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = match &instance.backing {
            Backing::Vm { pid, .. } => self.hypervisor.terminate(*pid).await,
            Backing::Container { container_name, .. } => self.runtime.stop(container_name).await,
        };

        match result {
            Ok(outcome) => {
                let stopped = self.commit(instance, |i| i.mark_stopped(reason))?;
                info!(id = %id, kind = %stopped.kind(), ?reason, ?outcome, "instance stopped");
                Ok(Some(stopped))
            }
            Err(source) => {
                error!("Failed to stop instance {}: {}", id, source);
                self.revert(id, InstanceStatus::Running, &source);
                Err(LifecycleError::ExternalTool { id, source })
            }
        }
    }

    /// Start a stopped container. VMs cannot be resumed, only reinstalled.
    pub async fn start(&self, id: InstanceId) -> Result<Instance> {
        let current = self.registry.get(id)?;
        let Backing::Container { container_name, .. } = &current.backing else {
            return Err(LifecycleError::UnsupportedOperation {
                operation: "start",
                kind: current.kind(),
            });
        };

        let instance = match self.registry.transition(
            id,
            &[InstanceStatus::Stopped],
            InstanceStatus::Starting,
        ) {
            Ok(instance) => instance,
            Err(LifecycleError::Busy {
                status: InstanceStatus::Running,
                ..
            }) => return self.registry.get(id),
            Err(e) => return Err(e),
        };

        match self.runtime.start(container_name).await {
            Ok(()) => {
                let started = self.commit(instance, Instance::mark_running)?;
                info!(id = %id, "instance started");
                Ok(started)
            }
            Err(source) => {
                error!("Failed to start instance {}: {}", id, source);
                self.revert(id, InstanceStatus::Stopped, &source);
                Err(LifecycleError::ExternalTool { id, source })
            }
        }
    }

    /// Stop if needed, tear down, and remove from the registry.
    ///
    /// A failed stop aborts the delete. Container removal errors are tolerated
    /// since the runtime object may already be gone.
    pub async fn delete(&self, id: InstanceId) -> Result<Instance> {
        let current = self.registry.get(id)?;
        if current.status == InstanceStatus::Running {
            self.stop(id).await?;
        }

        let instance =
            self.registry
                .transition(id, &[InstanceStatus::Stopped], InstanceStatus::Deleting)?;

        if let Backing::Container { container_name, .. } = &instance.backing {
            if let Err(e) = self.runtime.remove(container_name).await {
                warn!("Ignoring removal failure for {}: {}", container_name, e);
            }
        }

        let mut removed = match self.registry.remove(id) {
            Ok(removed) => removed,
            Err(LifecycleError::NotFound(_)) => instance,
            Err(e) => return Err(e),
        };
        removed.status = InstanceStatus::Deleted;
        info!(id = %id, kind = %removed.kind(), "instance deleted");
        Ok(removed)
    }

    /// Destroy an instance and provision a fresh one with the same parameters.
    ///
    /// Not transactional: if teardown succeeds and provisioning fails, the
    /// slot is left empty and `ReinstallReplacement` is returned.
    pub async fn reinstall(&self, id: InstanceId) -> Result<Instance> {
        let request = self.registry.get(id)?.to_request();

        self.delete(id)
            .await
            .map_err(|e| LifecycleError::ReinstallTeardown {
                id,
                source: Box::new(e),
            })?;

        match self.provisioner.create(&request).await {
            Ok(replacement) => {
                info!(old = %id, new = %replacement.id, "instance reinstalled");
                Ok(replacement)
            }
            Err(e) => {
                error!("Reinstall of {} left no replacement: {}", id, e);
                Err(LifecycleError::ReinstallReplacement {
                    id,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Apply the final write for a claimed record. A record deleted in the
    /// meantime counts as success.
    fn commit<F>(&self, claimed: Instance, f: F) -> Result<Instance>
    where
        F: Fn(&mut Instance),
    {
        match self.registry.update(claimed.id, &f) {
            Ok(updated) => Ok(updated),
            Err(LifecycleError::NotFound(_)) => {
                let mut gone = claimed;
                f(&mut gone);
                Ok(gone)
            }
            Err(e) => Err(e),
        }
    }

    fn revert(&self, id: InstanceId, status: InstanceStatus, cause: &ToolError) {
        let message = cause.to_string();
        if let Err(e) = self.registry.update(id, |i| {
            i.status = status;
            i.last_error = Some(message);
        }) {
            warn!("Could not record failure for {}: {}", id, e);
        }
    }
}
