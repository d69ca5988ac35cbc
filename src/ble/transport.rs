//! Abstract BLE transport interface.
//!
//! Defines the channel-level interface that scale drivers program against.
//! The production implementation wraps a btleplug peripheral
//! ([`crate::ble::BlePeripheralTransport`]); tests inject scripted fakes.
//!
//! A "channel" is a named, independently subscribable/writable data path on
//! a connected peripheral -- a GATT characteristic in BLE terms.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

/// Write mode for outgoing channel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write with response; the peripheral acknowledges the write.
    WithAck,
    /// Write without response; fire-and-forget.
    NoAck,
}

/// Inbound notification from a subscribed channel.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The channel the bytes arrived on.
    pub channel: Uuid,
    /// The notification payload.
    pub data: Vec<u8>,
}

/// Channel-level access to one peripheral.
///
/// All methods take `&self`; implementations use interior mutability so a
/// single transport can be shared between a driver and its notification
/// pump. Every transport failure surfaces as an [`Err`](crate::error::Error)
/// and is recovered by the driver's reconnection machinery, never escalated.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the link to the peripheral.
    async fn connect(&self) -> Result<()>;

    /// Tear down the link. Must be safe to call in any state.
    async fn disconnect(&self) -> Result<()>;

    /// Check whether the link is still up.
    ///
    /// Used by heartbeat paths to detect silent link loss between ticks.
    async fn is_link_alive(&self) -> bool;

    /// Enumerate the peripheral's channels after connecting.
    async fn discover_channels(&self) -> Result<()>;

    /// Check whether a channel was found during discovery.
    fn has_channel(&self, channel: Uuid) -> bool;

    /// Enable notifications on a channel.
    async fn subscribe(&self, channel: Uuid) -> Result<()>;

    /// Disable notifications on a channel.
    async fn unsubscribe(&self, channel: Uuid) -> Result<()>;

    /// Write bytes to a channel.
    async fn write(&self, channel: Uuid, data: &[u8], mode: WriteMode) -> Result<()>;

    /// Write bytes to a descriptor of a channel.
    ///
    /// Some scales require a raw CCCD write instead of (or in addition to)
    /// the platform subscribe call.
    async fn write_descriptor(&self, channel: Uuid, descriptor: Uuid, data: &[u8]) -> Result<()>;

    /// Get a receiver for inbound notifications from all subscribed channels.
    fn notifications(&self) -> broadcast::Receiver<Notification>;
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::FakeTransport;
    use super::*;
    use crate::ble::uuids::FELICITA_DATA_CHARACTERISTIC_UUID;

    #[tokio::test]
    async fn test_fake_transport_scripted_failures() {
        let transport = FakeTransport::new();
        transport.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(transport.connect_count(), 3);
        assert!(transport.is_link_alive().await);
    }

    #[tokio::test]
    async fn test_fake_transport_records_writes() {
        let transport =
            Arc::new(FakeTransport::with_channels(&[FELICITA_DATA_CHARACTERISTIC_UUID]));
        let dyn_transport: Arc<dyn Transport> = transport.clone();

        dyn_transport
            .write(FELICITA_DATA_CHARACTERISTIC_UUID, &[0x54], WriteMode::WithAck)
            .await
            .unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, vec![0x54]);
        assert_eq!(writes[0].2, WriteMode::WithAck);
    }

    #[tokio::test]
    async fn test_fake_transport_rejects_unknown_channel() {
        let transport = FakeTransport::new();
        let result = transport
            .write(FELICITA_DATA_CHARACTERISTIC_UUID, &[0x54], WriteMode::NoAck)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_notification_fan_out() {
        let transport = FakeTransport::with_channels(&[FELICITA_DATA_CHARACTERISTIC_UUID]);
        let mut rx = transport.notifications();

        transport.push(FELICITA_DATA_CHARACTERISTIC_UUID, &[1, 2, 3]);

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.channel, FELICITA_DATA_CHARACTERISTIC_UUID);
        assert_eq!(notification.data, vec![1, 2, 3]);
    }
}
