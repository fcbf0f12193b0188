//! Application settings management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an alternative settings file
pub const CONFIG_ENV: &str = "LEASEBOX_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write settings to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Static configuration supplied at process start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Images
    /// OS name to VM disk image path
    pub vm_images: BTreeMap<String, PathBuf>,
    /// OS name to container image reference
    pub container_images: BTreeMap<String, String>,

    // Tooling
    /// Hypervisor executable
    pub hypervisor_binary: String,
    /// QEMU `-net` backend
    pub vm_network_mode: String,
    /// Container runtime CLI (docker, podman)
    pub container_runtime_binary: String,
    /// Command that keeps a container alive without doing anything
    pub keepalive_command: Vec<String>,
    /// Upper bound on any single external tool call, in seconds
    pub command_timeout_secs: u64,

    // Monitoring
    /// How often the expiry monitor runs, in seconds
    pub expiry_check_interval_secs: u64,

    // Advanced
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let vm_images = BTreeMap::from([
            (
                "Ubuntu".to_string(),
                PathBuf::from("images/focal-server-cloudimg-amd64.img"),
            ),
            (
                "CentOS".to_string(),
                PathBuf::from("images/CentOS-7-x86_64-GenericCloud.qcow2"),
            ),
        ]);
        let container_images = BTreeMap::from([
            ("Ubuntu".to_string(), "ubuntu:latest".to_string()),
            ("CentOS".to_string(), "centos:latest".to_string()),
        ]);

        Self {
            vm_images,
            container_images,

            hypervisor_binary: "qemu-system-x86_64".to_string(),
            vm_network_mode: "user".to_string(),
            container_runtime_binary: "docker".to_string(),
            keepalive_command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            command_timeout_secs: 60,

            expiry_check_interval_secs: 30,

            debug_logging: false,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("leasebox")
            .join("settings.json")
    }

    /// The `--config` / `LEASEBOX_CONFIG` path if one was given, else the default
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit.unwrap_or_else(Self::default_path)
    }

    /// Load settings from `path`, falling back to defaults if the file is absent
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut settings: Settings =
            serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate();
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        std::fs::write(path, json).map_err(write_err)
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.command_timeout_secs = self.command_timeout_secs.clamp(1, 3600);
        self.expiry_check_interval_secs = self.expiry_check_interval_secs.max(1);
        if self.keepalive_command.is_empty() {
            self.keepalive_command = Self::default().keepalive_command;
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_check_interval_secs)
    }
}
