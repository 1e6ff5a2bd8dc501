//! Device Link Module
//!
//! Trait seam between the acquisition core and the platform BLE stack.
//! The Windows implementation lives in [`super::connection`]; tests
//! substitute hand-rolled links.

use crate::domain::models::DiscoveredDevice;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure to discover or reach a device. Surfaced to the operator;
/// never retried automatically.
#[derive(Error, PartialEq, Clone, Debug)]
pub enum ConnectionError {
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("device {0:#014X} is not reachable")]
    DeviceUnreachable(u64),
    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Failure on an established link. Surfaced to the operator; the
/// session is left as it was.
#[derive(Error, PartialEq, Clone, Debug)]
pub enum TransportError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Finds probe rigs and opens links to them.
#[async_trait]
pub trait DeviceConnector: Send {
    /// Scans for advertising devices for the given window.
    async fn discover(&self, scan_seconds: u64) -> Result<Vec<DiscoveredDevice>, ConnectionError>;

    /// Connects to a device by Bluetooth address.
    async fn connect(&self, address: u64) -> Result<Box<dyn DeviceLink + Send>, ConnectionError>;
}

/// A live connection to a rig.
#[async_trait]
pub trait DeviceLink: Send {
    /// Writes a raw command payload without response.
    async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Enables notifications and routes every telemetry payload into
    /// `sink` as raw bytes.
    async fn subscribe(
        &mut self,
        sink: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), TransportError>;
}
