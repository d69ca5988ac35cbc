//! BLE scanning functionality.
//!
//! Provides the scanner for discovering smart scales. The scanner records
//! every advertising peripheral it sees; deciding which of them is a
//! supported scale is the registry's job
//! ([`DriverRegistry::find_plugin_for`](crate::registry::DriverRegistry::find_plugin_for)).

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result};
use crate::registry::DriverRegistry;
use crate::utils::hex_string;

/// Snapshot of one advertising peripheral.
///
/// This is the unit the plugin registry matches on. Fields are captured at
/// advertisement time; a later advertisement from the same address refreshes
/// them in place.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredDevice {
    /// Advertised local name, empty if the device does not advertise one.
    pub name: String,
    /// Platform peripheral identifier (MAC address or platform UUID).
    pub address: String,
    /// Flattened manufacturer data: little-endian company identifier
    /// followed by the payload, concatenated over all entries.
    pub manufacturer_data: Vec<u8>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// When this device was first seen.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    /// Manufacturer data as contiguous lowercase hex.
    ///
    /// Matchers work on this rendering, e.g. Eureka scales advertise no name
    /// but carry `a6bc` in their manufacturer data.
    pub fn manufacturer_data_hex(&self) -> String {
        hex_string(&self.manufacturer_data)
    }
}

/// Event emitted by the scanner.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A new device appeared.
    Discovered(DiscoveredDevice),
    /// A known device advertised again with fresh properties.
    Updated(DiscoveredDevice),
    /// Scanning started.
    ScanStarted,
    /// Scanning stopped.
    ScanStopped,
}

/// Flatten btleplug manufacturer data into the advertisement byte order.
///
/// Keys are sorted so repeated snapshots of the same advertisement render
/// identically.
fn flatten_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let mut company_ids: Vec<u16> = data.keys().copied().collect();
    company_ids.sort_unstable();

    let mut flat = Vec::new();
    for company_id in company_ids {
        flat.extend_from_slice(&company_id.to_le_bytes());
        if let Some(payload) = data.get(&company_id) {
            flat.extend_from_slice(payload);
        }
    }
    flat
}

/// BLE scanner for discovering smart scales.
pub struct ScaleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Discovered peripherals in discovery order, deduplicated by address.
    discovered: Arc<RwLock<Vec<(DiscoveredDevice, Peripheral)>>>,
    /// Channel for scan events.
    event_tx: broadcast::Sender<ScanEvent>,
    /// Handle to the scanning task.
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl ScaleScanner {
    /// Create a new scanner on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(RwLock::new(Vec::new())),
            event_tx,
            scan_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start scanning for scales.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scan(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan for scales");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;
        let _ = self.event_tx.send(ScanEvent::ScanStarted);

        // Start the event processing task
        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let discovered = self.discovered.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(event, &adapter, &discovered, &event_tx).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        // Check if we should stop scanning
                        if !*is_scanning.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning. Idempotent.
    pub async fn stop_scan(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        // Wait for the scan task to complete
        if let Some(handle) = self.scan_handle.write().take() {
            let _ = handle.await;
        }

        let _ = self.event_tx.send(ScanEvent::ScanStopped);

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Snapshot of all devices seen so far, in discovery order.
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.discovered
            .read()
            .iter()
            .map(|(device, _)| device.clone())
            .collect()
    }

    /// Get the peripheral handle for a discovered address.
    pub fn peripheral_for(&self, address: &str) -> Option<Peripheral> {
        self.discovered
            .read()
            .iter()
            .find(|(device, _)| device.address == address)
            .map(|(_, peripheral)| peripheral.clone())
    }

    /// Forget all discovered devices.
    pub fn clear_discovered(&self) {
        self.discovered.write().clear();
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Poll discovered devices until one matches a registered plugin.
    ///
    /// Mirrors the typical host flow: scan, wait for a supported scale to
    /// appear, then connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no supported scale appears in time.
    pub async fn wait_for_match(
        &self,
        registry: &DriverRegistry,
        timeout: Duration,
    ) -> Result<DiscoveredDevice> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let discovered = self.discovered.read();
                for (device, _) in discovered.iter() {
                    if registry.find_plugin_for(device).is_some() {
                        return Ok(device.clone());
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: btleplug::api::CentralEvent,
        adapter: &Adapter,
        discovered: &Arc<RwLock<Vec<(DiscoveredDevice, Peripheral)>>>,
        event_tx: &broadcast::Sender<ScanEvent>,
    ) {
        use btleplug::api::CentralEvent;

        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Self::process_peripheral(adapter, id, discovered, event_tx).await;
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                Self::process_peripheral(adapter, id, discovered, event_tx).await;
            }
            CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                trace!("Manufacturer data advertisement: {:?}", id);
                Self::process_peripheral(adapter, id, discovered, event_tx).await;
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
            }
            CentralEvent::ServiceDataAdvertisement { .. } => {}
            CentralEvent::ServicesAdvertisement { .. } => {}
            CentralEvent::StateUpdate(_) => {}
        }
    }

    /// Record or refresh a discovered peripheral.
    async fn process_peripheral(
        adapter: &Adapter,
        id: btleplug::platform::PeripheralId,
        discovered: &Arc<RwLock<Vec<(DiscoveredDevice, Peripheral)>>>,
        event_tx: &broadcast::Sender<ScanEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let address = id.to_string();
        let name = properties.local_name.unwrap_or_default();
        let manufacturer_data = flatten_manufacturer_data(&properties.manufacturer_data);
        let rssi = properties.rssi;

        let mut devices = discovered.write();

        if let Some((existing, _)) = devices.iter_mut().find(|(d, _)| d.address == address) {
            // Refresh in place; advertisements often trickle in, with the
            // name or manufacturer data arriving on a later packet.
            if !name.is_empty() {
                existing.name = name;
            }
            if !manufacturer_data.is_empty() {
                existing.manufacturer_data = manufacturer_data;
            }
            existing.rssi = rssi;

            let snapshot = existing.clone();
            drop(devices);
            let _ = event_tx.send(ScanEvent::Updated(snapshot));
        } else {
            let device = DiscoveredDevice {
                name,
                address,
                manufacturer_data,
                rssi,
                discovered_at: Utc::now(),
            };

            debug!(
                "Discovered device '{}' at {} (rssi {:?})",
                device.name, device.address, device.rssi
            );

            devices.push((device.clone(), peripheral));
            drop(devices);
            let _ = event_tx.send(ScanEvent::Discovered(device));
        }
    }
}

impl Drop for ScaleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}
