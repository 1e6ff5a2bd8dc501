//! BLE Connection Module
//!
//! WinRT-backed connector and link for the probe rig.

use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::link::{
    ConnectionError, DeviceConnector, DeviceLink, TransportError,
};
use crate::infrastructure::bluetooth::{protocol, scanner};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};
use windows::Devices::Bluetooth::BluetoothLEDevice;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

/// Characteristic UUIDs the connector resolves on each new device.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub command_char_uuid: String,
    pub telemetry_char_uuid: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_char_uuid: protocol::COMMAND_CHAR_UUID.to_string(),
            telemetry_char_uuid: protocol::TELEMETRY_CHAR_UUID.to_string(),
        }
    }
}

/// Connector backed by the Windows Bluetooth LE stack.
pub struct WinRtConnector {
    config: LinkConfig,
}

impl WinRtConnector {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeviceConnector for WinRtConnector {
    async fn discover(&self, scan_seconds: u64) -> Result<Vec<DiscoveredDevice>, ConnectionError> {
        scanner::discover(scan_seconds)
            .await
            .map_err(|e| ConnectionError::ScanFailed(e.to_string()))
    }

    async fn connect(&self, address: u64) -> Result<Box<dyn DeviceLink + Send>, ConnectionError> {
        let link = WinRtLink::open(address, &self.config).await?;
        Ok(Box::new(link))
    }
}

/// A live GATT connection to the rig.
pub struct WinRtLink {
    device: BluetoothLEDevice,
    command_char: GattCharacteristic,
    telemetry_char: GattCharacteristic,
    // Held so Windows keeps the connection alive between writes.
    _session: Option<GattSession>,
}

impl WinRtLink {
    async fn open(address: u64, config: &LinkConfig) -> Result<Self, ConnectionError> {
        info!("Connecting to Bluetooth device: {:#X}", address);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)
            .map_err(|e| ConnectionError::Other(e.to_string()))?
            .await
            .map_err(|_| ConnectionError::DeviceUnreachable(address))?;
        info!("Device connected: {}", device.Name().unwrap_or_default());

        let session = match Self::maintain_session(&device).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Could not create GattSession, continuing anyway: {e}");
                None
            }
        };

        let command_uuid = protocol::parse_uuid(&config.command_char_uuid)
            .map_err(|e| ConnectionError::Other(e.to_string()))?;
        let telemetry_uuid = protocol::parse_uuid(&config.telemetry_char_uuid)
            .map_err(|e| ConnectionError::Other(e.to_string()))?;

        let characteristics = Self::all_characteristics(&device)
            .await
            .map_err(|e| ConnectionError::Other(e.to_string()))?;
        info!("Found {} characteristics", characteristics.len());

        let mut command_char = None;
        let mut telemetry_char = None;
        for characteristic in characteristics {
            match characteristic.Uuid() {
                Ok(uuid) if uuid == command_uuid => command_char = Some(characteristic),
                Ok(uuid) if uuid == telemetry_uuid => telemetry_char = Some(characteristic),
                _ => {}
            }
        }

        let command_char = command_char.ok_or_else(|| {
            ConnectionError::CharacteristicNotFound(config.command_char_uuid.clone())
        })?;
        let telemetry_char = telemetry_char.ok_or_else(|| {
            ConnectionError::CharacteristicNotFound(config.telemetry_char_uuid.clone())
        })?;
        info!("Resolved command and telemetry characteristics");

        Ok(Self {
            device,
            command_char,
            telemetry_char,
            _session: session,
        })
    }

    async fn maintain_session(device: &BluetoothLEDevice) -> windows::core::Result<GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    /// Collects the characteristics of every GATT service on the
    /// device. The rig firmware does not document its service layout,
    /// so characteristics are matched by UUID across all services.
    async fn all_characteristics(
        device: &BluetoothLEDevice,
    ) -> windows::core::Result<Vec<GattCharacteristic>> {
        let mut out = Vec::new();

        let services_result = device.GetGattServicesAsync()?.await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            warn!(
                "Failed to enumerate GATT services: {:?}",
                services_result.Status()?
            );
            return Ok(out);
        }

        let services = services_result.Services()?;
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let _ = service.RequestAccessAsync()?.await;

            let chars_result = service.GetCharacteristicsAsync()?.await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                continue;
            }

            let characteristics = chars_result.Characteristics()?;
            for j in 0..characteristics.Size()? {
                out.push(characteristics.GetAt(j)?);
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl DeviceLink for WinRtLink {
    async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let writer = DataWriter::new().map_err(write_err)?;
        writer.WriteBytes(payload).map_err(write_err)?;
        let buffer = writer.DetachBuffer().map_err(write_err)?;

        let status = self
            .command_char
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithoutResponse)
            .map_err(write_err)?
            .await
            .map_err(write_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::WriteFailed(format!("status {status:?}")));
        }
        Ok(())
    }

    async fn subscribe(
        &mut self,
        sink: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = args.CharacteristicValue()?;
                    let reader = DataReader::FromBuffer(&value)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    let _ = sink.send(bytes);
                }
                Ok(())
            },
        );
        self.telemetry_char
            .ValueChanged(&handler)
            .map_err(subscribe_err)?;

        let status = self
            .telemetry_char
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )
            .map_err(subscribe_err)?
            .await
            .map_err(subscribe_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::SubscribeFailed(format!("status {status:?}")));
        }

        info!("Subscribed to telemetry notifications");
        Ok(())
    }
}

impl Drop for WinRtLink {
    fn drop(&mut self) {
        info!("Closing Bluetooth device");
        let _ = self.device.Close();
    }
}

fn write_err(e: windows::core::Error) -> TransportError {
    TransportError::WriteFailed(e.to_string())
}

fn subscribe_err(e: windows::core::Error) -> TransportError {
    TransportError::SubscribeFailed(e.to_string())
}
