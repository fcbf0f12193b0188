//! Instance records - The unit of management for VMs and containers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex characters, used to derive container names
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Which backend an instance lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Vm,
    Container,
}

impl InstanceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Vm => "vm",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for InstanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vm" => Ok(Self::Vm),
            "container" => Ok(Self::Container),
            other => Err(format!("unknown instance kind: {other}")),
        }
    }
}

/// Status of an instance
///
/// `Starting`, `Stopping` and `Deleting` mark an external call in flight; a
/// record in one of these states is owned by the caller that set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Instance is being started by the runtime
    Starting,
    /// Instance is running normally
    Running,
    /// A stop command is in flight
    Stopping,
    /// Instance has stopped
    #[serde(alias = "terminated")]
    Stopped,
    /// Teardown is in flight
    Deleting,
    /// Final status reported by delete; never stored in the registry
    Deleted,
}

impl InstanceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" | "terminated" => Ok(Self::Stopped),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// Why an instance last left the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Stopped on request
    Manual,
    /// Allotted runtime elapsed
    Expired,
    /// The process or container went away without us stopping it
    ExitedExternally,
}

/// Display mode for the hypervisor window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Graphical,
    Headless,
}

/// Requested resource limits, passed through to the runtime unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Memory in MB
    pub memory_mb: u32,
    /// Number of virtual CPUs
    pub cpu_count: u32,
    /// Disk size in GB (advisory for containers)
    pub disk_gb: Option<u32>,
}

/// Variant-specific options for a new instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LaunchOptions {
    Vm {
        #[serde(default)]
        display: DisplayMode,
        /// Optional cloud-init / installation media
        #[serde(default)]
        seed_iso: Option<PathBuf>,
    },
    Container,
}

impl LaunchOptions {
    pub fn kind(&self) -> InstanceKind {
        match self {
            Self::Vm { .. } => InstanceKind::Vm,
            Self::Container => InstanceKind::Container,
        }
    }
}

/// Everything needed to provision an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub os_choice: String,
    pub resources: ResourceRequest,
    pub allotted_runtime: Duration,
    pub launch: LaunchOptions,
}

impl InstanceRequest {
    pub fn vm(os_choice: impl Into<String>, resources: ResourceRequest, runtime: Duration) -> Self {
        Self {
            os_choice: os_choice.into(),
            resources,
            allotted_runtime: runtime,
            launch: LaunchOptions::Vm {
                display: DisplayMode::default(),
                seed_iso: None,
            },
        }
    }

    pub fn container(
        os_choice: impl Into<String>,
        resources: ResourceRequest,
        runtime: Duration,
    ) -> Self {
        Self {
            os_choice: os_choice.into(),
            resources,
            allotted_runtime: runtime,
            launch: LaunchOptions::Container,
        }
    }

    pub fn with_display(mut self, mode: DisplayMode) -> Self {
        if let LaunchOptions::Vm { display, .. } = &mut self.launch {
            *display = mode;
        }
        self
    }

    pub fn with_seed_iso(mut self, path: impl Into<PathBuf>) -> Self {
        if let LaunchOptions::Vm { seed_iso, .. } = &mut self.launch {
            *seed_iso = Some(path.into());
        }
        self
    }

    pub fn kind(&self) -> InstanceKind {
        self.launch.kind()
    }
}

/// Reference to the real resource behind an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backing {
    Vm {
        image_path: PathBuf,
        pid: u32,
        display: DisplayMode,
        seed_iso: Option<PathBuf>,
    },
    Container {
        image: String,
        container_name: String,
        container_id: String,
    },
}

/// A provisioned VM or container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique identifier
    pub id: InstanceId,
    /// Selected OS image name
    pub os_choice: String,
    /// Requested limits
    pub resources: ResourceRequest,
    /// Budget after which the expiry monitor stops the instance
    pub allotted_runtime: Duration,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: InstanceStatus,
    /// When the instance last stopped
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
    /// Last error reported by the external tooling
    pub last_error: Option<String>,
    /// External handle and variant-specific data
    pub backing: Backing,
}

impl Instance {
    pub fn new(
        id: InstanceId,
        os_choice: impl Into<String>,
        resources: ResourceRequest,
        allotted_runtime: Duration,
        backing: Backing,
    ) -> Self {
        Self {
            id,
            os_choice: os_choice.into(),
            resources,
            allotted_runtime,
            created_at: Utc::now(),
            status: InstanceStatus::Running,
            stopped_at: None,
            stop_reason: None,
            last_error: None,
            backing,
        }
    }

    pub fn kind(&self) -> InstanceKind {
        match self.backing {
            Backing::Vm { .. } => InstanceKind::Vm,
            Backing::Container { .. } => InstanceKind::Container,
        }
    }

    /// Time since creation, zero if the clock went backwards
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// Whether the allotted runtime has been exceeded at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_at(now) > self.allotted_runtime
    }

    /// Rebuild the request this instance was provisioned from
    pub fn to_request(&self) -> InstanceRequest {
        let launch = match &self.backing {
            Backing::Vm {
                display, seed_iso, ..
            } => LaunchOptions::Vm {
                display: *display,
                seed_iso: seed_iso.clone(),
            },
            Backing::Container { .. } => LaunchOptions::Container,
        };
        InstanceRequest {
            os_choice: self.os_choice.clone(),
            resources: self.resources,
            allotted_runtime: self.allotted_runtime,
            launch,
        }
    }

    /// Mark instance as stopped
    pub fn mark_stopped(&mut self, reason: StopReason) {
        self.status = InstanceStatus::Stopped;
        self.stopped_at = Some(Utc::now());
        self.stop_reason = Some(reason);
        self.last_error = None;
    }

    /// Mark instance as running again
    pub fn mark_running(&mut self) {
        self.status = InstanceStatus::Running;
        self.stopped_at = None;
        self.stop_reason = None;
        self.last_error = None;
    }

    /// Format remaining runtime as human-readable string
    pub fn remaining_string(&self, now: DateTime<Utc>) -> String {
        let secs = self
            .allotted_runtime
            .saturating_sub(self.elapsed_at(now))
            .as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }
}
