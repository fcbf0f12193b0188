//! Leasebox - Short-lived VMs and containers with enforced runtimes
//!
//! The crate keeps an in-memory registry of instances backed by a QEMU process
//! or a container, drives their lifecycle through the external tooling, and
//! stops them once their allotted runtime is spent.

pub mod core;
pub mod driver;
pub mod platform;
pub mod shell;

/// Application name constant
pub const APP_NAME: &str = "Leasebox";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
