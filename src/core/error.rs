//! Error taxonomy for lifecycle operations

use std::path::PathBuf;

use super::instance::{InstanceId, InstanceKind, InstanceStatus};
use crate::driver::ToolError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("unsupported OS for {kind}: {os}")]
    UnsupportedOs { kind: InstanceKind, os: String },

    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("failed to launch VM: {0}")]
    Launch(#[source] ToolError),

    #[error("failed to create container: {0}")]
    Creation(#[source] ToolError),

    #[error("instance not found: {0}")]
    NotFound(InstanceId),

    #[error("{operation} is not supported for {kind} instances")]
    UnsupportedOperation {
        operation: &'static str,
        kind: InstanceKind,
    },

    #[error("external tool failed for {id}: {source}")]
    ExternalTool {
        id: InstanceId,
        #[source]
        source: ToolError,
    },

    #[error("instance {id} is busy ({status})")]
    Busy { id: InstanceId, status: InstanceStatus },

    #[error("instance {0} is already registered")]
    DuplicateId(InstanceId),

    #[error("reinstall of {id} failed while tearing down: {source}")]
    ReinstallTeardown {
        id: InstanceId,
        #[source]
        source: Box<LifecycleError>,
    },

    #[error("reinstall of {id} removed the old instance but failed to create a replacement: {source}")]
    ReinstallReplacement {
        id: InstanceId,
        #[source]
        source: Box<LifecycleError>,
    },
}

impl LifecycleError {
    /// Short machine-readable kind for front ends
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedOs { .. } => "unsupported_os",
            Self::ImageNotFound(_) => "image_not_found",
            Self::Launch(_) => "launch_error",
            Self::Creation(_) => "creation_error",
            Self::NotFound(_) => "not_found",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::ExternalTool { .. } => "external_tool_error",
            Self::Busy { .. } => "busy",
            Self::DuplicateId(_) => "duplicate_id",
            Self::ReinstallTeardown { .. } => "reinstall_teardown_failed",
            Self::ReinstallReplacement { .. } => "reinstall_replacement_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
