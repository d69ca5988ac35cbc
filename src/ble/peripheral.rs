//! btleplug-backed transport.
//!
//! Implements [`Transport`] on top of a btleplug [`Peripheral`]: link
//! management, characteristic discovery and caching, subscription handling,
//! and a pump task that forwards platform notifications into the transport's
//! broadcast channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{Notification, Transport, WriteMode};
use crate::error::{Error, Result};

/// [`Transport`] implementation for one btleplug peripheral.
pub struct BlePeripheralTransport {
    /// The underlying platform peripheral.
    peripheral: Peripheral,
    /// Cached characteristics by UUID, filled by `discover_channels`.
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
    /// Channel for inbound notifications.
    notification_tx: broadcast::Sender<Notification>,
    /// Whether the pump task should keep running.
    is_pumping: Arc<RwLock<bool>>,
    /// Handle to the pump task.
    pump_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BlePeripheralTransport {
    /// Wrap a discovered peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        let (notification_tx, _) = broadcast::channel(256);

        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(HashMap::new())),
            notification_tx,
            is_pumping: Arc::new(RwLock::new(false)),
            pump_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the underlying peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Start forwarding platform notifications into the broadcast channel.
    async fn start_pump(&self) -> Result<()> {
        if *self.is_pumping.read() {
            return Ok(());
        }

        *self.is_pumping.write() = true;

        let peripheral = self.peripheral.clone();
        let is_pumping = self.is_pumping.clone();
        let notification_tx = self.notification_tx.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to get notification stream: {}", e);
                    *is_pumping.write() = false;
                    return;
                }
            };

            debug!("Notification pump started");

            while *is_pumping.read() {
                tokio::select! {
                    Some(notification) = notifications.next() => {
                        trace!(
                            "Notification from {}: {} bytes",
                            notification.uuid,
                            notification.value.len()
                        );

                        let _ = notification_tx.send(Notification {
                            channel: notification.uuid,
                            data: notification.value,
                        });
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                        if !*is_pumping.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Notification pump stopped");
        });

        *self.pump_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop the pump task.
    fn stop_pump(&self) {
        *self.is_pumping.write() = false;

        if let Some(handle) = self.pump_handle.write().take() {
            handle.abort();
        }
    }

    /// Get a cached characteristic by UUID.
    fn characteristic(&self, channel: Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(&channel)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: channel.to_string(),
            })
    }
}

#[async_trait]
impl Transport for BlePeripheralTransport {
    async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral already connected at BLE level");
        } else {
            self.peripheral.connect().await.map_err(Error::Bluetooth)?;
        }

        self.start_pump().await?;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_pump();
        self.characteristics.write().clear();

        if !self.peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }

        self.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }

    async fn is_link_alive(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_channels(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in services {
            for characteristic in service.characteristics {
                trace!(
                    "Found characteristic {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        Ok(())
    }

    fn has_channel(&self, channel: Uuid) -> bool {
        self.characteristics.read().contains_key(&channel)
    }

    async fn subscribe(&self, channel: Uuid) -> Result<()> {
        let characteristic = self.characteristic(channel)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Subscribed to notifications from {}", channel);

        Ok(())
    }

    async fn unsubscribe(&self, channel: Uuid) -> Result<()> {
        let characteristic = self.characteristic(channel)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Unsubscribed from notifications from {}", channel);

        Ok(())
    }

    async fn write(&self, channel: Uuid, data: &[u8], mode: WriteMode) -> Result<()> {
        let characteristic = self.characteristic(channel)?;

        let write_type = match mode {
            WriteMode::WithAck => WriteType::WithResponse,
            WriteMode::NoAck => WriteType::WithoutResponse,
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to {}", data.len(), channel);

        Ok(())
    }

    async fn write_descriptor(&self, channel: Uuid, descriptor: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(channel)?;

        let target = characteristic
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: descriptor.to_string(),
            })?;

        self.peripheral
            .write_descriptor(&target, data)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to descriptor {} of {}", data.len(), descriptor, channel);

        Ok(())
    }

    fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notification_tx.subscribe()
    }
}

impl Drop for BlePeripheralTransport {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
