//! BLE Scanner Module
//!
//! One-shot Bluetooth LE discovery. The rig does not advertise its
//! service UUIDs, so every visible device is reported.

use crate::domain::models::DiscoveredDevice;
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

/// Watches advertisements for `scan_seconds`, then returns every
/// device seen, deduplicated by address.
pub async fn discover(scan_seconds: u64) -> Result<Vec<DiscoveredDevice>> {
    info!("Starting BLE scan ({scan_seconds}s window)");

    let watcher = BluetoothLEAdvertisementWatcher::new()?;
    watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = TypedEventHandler::new(
        move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
              args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let name = args.Advertisement()?.LocalName()?.to_string();
                let address = args.BluetoothAddress()?;
                let rssi = args.RawSignalStrengthInDBm()?;

                let _ = tx.send(DiscoveredDevice {
                    name: if name.is_empty() {
                        "Unknown".to_string()
                    } else {
                        name
                    },
                    address,
                    signal_strength: rssi,
                });
            }
            Ok(())
        },
    );

    watcher.Received(&handler)?;
    watcher.Start()?;
    tokio::time::sleep(tokio::time::Duration::from_secs(scan_seconds)).await;
    watcher.Stop()?;

    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    while let Ok(device) = rx.try_recv() {
        if let Some(existing) = devices.iter_mut().find(|d| d.address == device.address) {
            existing.signal_strength = device.signal_strength;
            if existing.name == "Unknown" && device.name != "Unknown" {
                existing.name = device.name;
            }
        } else {
            devices.push(device);
        }
    }

    info!("Scan finished, {} device(s) found", devices.len());
    Ok(devices)
}
