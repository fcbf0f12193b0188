//! Instance registry - The single owner of all instance records

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use super::error::{LifecycleError, Result};
use super::instance::{Instance, InstanceId, InstanceStatus};

/// Insertion-ordered, lock-guarded collection of instances.
///
/// Callers only ever receive clones. The lock is held for the duration of a
/// single method call and never across an external tool invocation.
#[derive(Default)]
pub struct Registry {
    instances: RwLock<Vec<Instance>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write leaves the vector consistent, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Instance>> {
        self.instances.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Instance>> {
        self.instances.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a new record
    pub fn insert(&self, instance: Instance) -> Result<()> {
        let mut instances = self.write();
        if instances.iter().any(|i| i.id == instance.id) {
            return Err(LifecycleError::DuplicateId(instance.id));
        }
        trace!(id = %instance.id, "registry insert");
        instances.push(instance);
        Ok(())
    }

    pub fn get(&self, id: InstanceId) -> Result<Instance> {
        self.read()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(LifecycleError::NotFound(id))
    }

    pub fn list_all(&self) -> Vec<Instance> {
        self.read().clone()
    }

    pub fn list_by_status(&self, status: InstanceStatus) -> Vec<Instance> {
        self.read()
            .iter()
            .filter(|i| i.status == status)
            .cloned()
            .collect()
    }

    /// Snapshot of ids currently in `status`
    pub fn ids_with_status(&self, status: InstanceStatus) -> Vec<InstanceId> {
        self.read()
            .iter()
            .filter(|i| i.status == status)
            .map(|i| i.id)
            .collect()
    }

    /// Remove a record, returning it
    pub fn remove(&self, id: InstanceId) -> Result<Instance> {
        let mut instances = self.write();
        let index = instances
            .iter()
            .position(|i| i.id == id)
            .ok_or(LifecycleError::NotFound(id))?;
        trace!(id = %id, "registry remove");
        Ok(instances.remove(index))
    }

    /// Unconditionally overwrite the status of a record
    pub fn update_status(&self, id: InstanceId, status: InstanceStatus) -> Result<Instance> {
        self.update(id, |instance| instance.status = status)
    }

    /// Apply `f` to a record under the write lock and return the result
    pub fn update<F>(&self, id: InstanceId, f: F) -> Result<Instance>
    where
        F: FnOnce(&mut Instance),
    {
        let mut instances = self.write();
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(LifecycleError::NotFound(id))?;
        f(instance);
        Ok(instance.clone())
    }

    /// Compare-and-set on status.
    ///
    /// Succeeds only if the current status is one of `from`; returns the record
    /// as it was before the write. Otherwise fails with `Busy` and leaves the
    /// record untouched.
    pub fn transition(
        &self,
        id: InstanceId,
        from: &[InstanceStatus],
        to: InstanceStatus,
    ) -> Result<Instance> {
        let mut instances = self.write();
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(LifecycleError::NotFound(id))?;
        if !from.contains(&instance.status) {
            return Err(LifecycleError::Busy {
                id,
                status: instance.status,
            });
        }
        let before = instance.clone();
        trace!(id = %id, from = %before.status, to = %to, "registry transition");
        instance.status = to;
        Ok(before)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
