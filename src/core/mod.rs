//! Core module - Instance registry, provisioning, lifecycle and expiry

mod app_state;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod monitor;
pub mod provisioner;
pub mod registry;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use app_state::AppState;
pub use error::LifecycleError;
pub use instance::{
    Backing, DisplayMode, Instance, InstanceId, InstanceKind, InstanceRequest, InstanceStatus,
    LaunchOptions, ResourceRequest, StopReason,
};
pub use settings::Settings;
