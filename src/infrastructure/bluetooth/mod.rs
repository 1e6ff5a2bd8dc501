//! Bluetooth Module
//!
//! BLE plumbing for the probe rig link.
//!
//! ## Modules
//!
//! - [`protocol`] - Rig protocol: command encoding and telemetry parsing
//! - [`link`] - Connector and link traits the acquisition core consumes
//! - [`scanner`] - BLE device discovery (Windows)
//! - [`connection`] - WinRT-backed connector and link (Windows)

pub mod link;
pub mod protocol;

#[cfg(windows)]
pub mod connection;
#[cfg(windows)]
pub mod scanner;
