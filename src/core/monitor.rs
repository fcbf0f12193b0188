//! Expiry monitoring - Enforcing allotted runtimes and reconciling with the tooling

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::instance::{Backing, Instance, InstanceStatus, StopReason};
use super::lifecycle::LifecycleController;
use super::registry::Registry;
use crate::driver::{ContainerRuntime, Hypervisor};

/// Stops instances whose runtime budget is spent.
///
/// Enforcement is level-triggered: an instance whose stop fails stays
/// `Running` and is picked up again on the next pass.
pub struct ExpiryMonitor {
    registry: Arc<Registry>,
    controller: Arc<LifecycleController>,
    hypervisor: Arc<dyn Hypervisor>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ExpiryMonitor {
    pub fn new(
        registry: Arc<Registry>,
        controller: Arc<LifecycleController>,
        hypervisor: Arc<dyn Hypervisor>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            registry,
            controller,
            hypervisor,
            runtime,
        }
    }

    /// Run one expiry pass against the current time
    pub async fn check_expired(&self) -> Vec<Instance> {
        self.check_expired_at(Utc::now()).await
    }

    /// Run one expiry pass as if the time were `now`
    pub async fn check_expired_at(&self, now: DateTime<Utc>) -> Vec<Instance> {
        // Stopping mutates the registry, so work from a snapshot of ids
        let running = self.registry.ids_with_status(InstanceStatus::Running);
        let mut stopped = Vec::new();

        for id in running {
            let Ok(instance) = self.registry.get(id) else {
                continue;
            };
            if instance.status != InstanceStatus::Running || !instance.is_expired_at(now) {
                continue;
            }

            info!(
                id = %id,
                elapsed_secs = instance.elapsed_at(now).as_secs(),
                allotted_secs = instance.allotted_runtime.as_secs(),
                "runtime budget exhausted, stopping"
            );
            // A manual stop may land between the read above and this call
            match self.controller.stop_if_running(id, StopReason::Expired).await {
                Ok(Some(instance)) => stopped.push(instance),
                Ok(None) => debug!(id = %id, "already stopped by someone else"),
                Err(e) => warn!("Expiry stop of {} failed, will retry: {}", id, e),
            }
        }

        debug!("Expiry pass stopped {} instance(s)", stopped.len());
        stopped
    }

    /// Mark running records whose process or container disappeared as stopped
    pub async fn reconcile(&self) -> Vec<Instance> {
        let running = self.registry.ids_with_status(InstanceStatus::Running);
        let mut reconciled = Vec::new();

        for id in running {
            let Ok(instance) = self.registry.get(id) else {
                continue;
            };

            let alive = match &instance.backing {
                Backing::Vm { pid, .. } => self.hypervisor.is_running(*pid).await,
                Backing::Container { container_name, .. } => self
                    .runtime
                    .is_running(container_name)
                    .await
                    .map(|state| state.unwrap_or(false)),
            };

            match alive {
                Ok(true) => {}
                Ok(false) => {
                    let updated = self.registry.update(id, |i| {
                        if i.status == InstanceStatus::Running {
                            i.mark_stopped(StopReason::ExitedExternally);
                        }
                    });
                    if let Ok(updated) = updated {
                        if updated.stop_reason == Some(StopReason::ExitedExternally) {
                            warn!(id = %id, "backing resource vanished, marked stopped");
                            reconciled.push(updated);
                        }
                    }
                }
                Err(e) => debug!("Liveness probe for {} failed: {}", id, e),
            }
        }

        reconciled
    }
}

/// Spawn the background expiry task.
///
/// Each tick reconciles against the tooling and then enforces runtimes.
pub fn spawn_expiry_monitor(monitor: Arc<ExpiryMonitor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let vanished = monitor.reconcile().await;
            if !vanished.is_empty() {
                info!("Reconciled {} vanished instance(s)", vanished.len());
            }
            let expired = monitor.check_expired().await;
            if !expired.is_empty() {
                info!("Stopped {} expired instance(s)", expired.len());
            }
            if monitor.registry.is_empty() {
                debug!("No instances to monitor");
            }
        }
    })
}
