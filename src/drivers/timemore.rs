//! Timemore Black Mirror scale driver.
//!
//! The scale streams fixed 9-byte frames on the standard weight
//! measurement characteristic and may pack several per notification, so
//! deliveries are reassembled through a buffer and drained frame by
//! frame:
//!
//! ```text
//! | 0    | 1 .. 4         | 5 .. 8       |
//! | type | dripper weight | total weight |
//! ```
//!
//! Both weights are signed 32-bit little-endian values in tenths of a
//! gram; only the total is reported. There is no checksum.
//!
//! Notifications require a CCCD descriptor write plus an explicit
//! enable command during the handshake, and the link drops unless it is
//! poked every couple of seconds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    CCCD_UUID, TIMEMORE_COMMAND_CHARACTERISTIC_UUID, TIMEMORE_WEIGHT_CHARACTERISTIC_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameBuffer};

const FRAME_LEN: usize = 9;

const TYPE_WEIGHT: u8 = 0x10;

const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];
const CMD_REQUEST_NOTIFICATIONS: [u8; 2] = [0x02, 0x00];
const CMD_HEARTBEAT: [u8; 1] = [0x00];
const CMD_TARE: [u8; 1] = [0x00];

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

fn decode_frame(data: &[u8]) -> Frame {
    match data[0] {
        TYPE_WEIGHT => {
            let raw = i32::from_le_bytes([data[5], data[6], data[7], data[8]]);
            Frame::Weight {
                grams: raw as f32 / 10.0,
            }
        }
        _ => Frame::Unknown,
    }
}

/// Driver for Timemore Black Mirror scales.
pub struct TimemoreDriver {
    session: ScaleSession,
    buffer: FrameBuffer,
}

impl TimemoreDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("timemore", transport),
            buffer: FrameBuffer::new(),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let transport = self.session.transport();
        if !transport.has_channel(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID)
            || !transport.has_channel(TIMEMORE_COMMAND_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "weight or command characteristic not found".to_string(),
            });
        }

        // The scale ignores subscriptions until the CCCD is set by hand.
        transport
            .write_descriptor(
                TIMEMORE_WEIGHT_CHARACTERISTIC_UUID,
                CCCD_UUID,
                &ENABLE_NOTIFICATIONS,
            )
            .await?;

        transport
            .write(
                TIMEMORE_WEIGHT_CHARACTERISTIC_UUID,
                &CMD_REQUEST_NOTIFICATIONS,
                WriteMode::WithAck,
            )
            .await?;

        transport
            .subscribe(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ScaleDriver for TimemoreDriver {
    fn id(&self) -> &'static str {
        "timemore"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("timemore: already connected");
            return Ok(());
        }

        self.session.establish_link().await?;

        if let Err(e) = self.handshake().await {
            self.session.log(format!("Handshake failed: {}", e));
            self.session.teardown_link().await;
            return Err(e);
        }

        self.buffer.clear();
        self.session.finish_connect();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.session.teardown_link().await;
        Ok(())
    }

    async fn update(&mut self) {
        if self.session.reconnect_pending() {
            self.session.log("Reconnecting");
            self.session.teardown_link().await;
            if let Err(e) = self.connect().await {
                debug!("timemore: reconnect failed: {}", e);
            }
            return;
        }

        if !self.session.check_link().await {
            return;
        }

        if self.session.heartbeat_due(HEARTBEAT_INTERVAL) {
            if let Err(e) = self
                .session
                .transport()
                .write(
                    TIMEMORE_WEIGHT_CHARACTERISTIC_UUID,
                    &CMD_HEARTBEAT,
                    WriteMode::WithAck,
                )
                .await
            {
                debug!("timemore: heartbeat write failed: {}", e);
            }
        }
    }

    async fn tare(&mut self) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }

        self.session
            .transport()
            .write(
                TIMEMORE_COMMAND_CHARACTERISTIC_UUID,
                &CMD_TARE,
                WriteMode::WithAck,
            )
            .await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != TIMEMORE_WEIGHT_CHARACTERISTIC_UUID {
            return;
        }

        self.buffer.extend(data);
        while self.buffer.len() >= FRAME_LEN {
            let bytes = self.buffer.as_slice()[..FRAME_LEN].to_vec();
            self.buffer.consume(FRAME_LEN);
            self.session.push_frame(decode_frame(&bytes));
        }
    }

    fn events(&self) -> broadcast::Receiver<ScaleEvent> {
        self.session.subscribe()
    }

    fn state(&self) -> DriverState {
        self.session.state()
    }

    fn weight(&self) -> f32 {
        self.session.weight()
    }

    fn battery(&self) -> Option<u8> {
        self.session.battery()
    }

    fn timer_seconds(&self) -> Option<u32> {
        self.session.timer_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::testing::FakeTransport;
    use pretty_assertions::assert_eq;

    fn weight_frame(tenths: i32) -> [u8; FRAME_LEN] {
        let mut data = [0u8; FRAME_LEN];
        data[0] = TYPE_WEIGHT;
        data[5..9].copy_from_slice(&tenths.to_le_bytes());
        data
    }

    fn connected_driver() -> (TimemoreDriver, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::with_channels(&[
            TIMEMORE_WEIGHT_CHARACTERISTIC_UUID,
            TIMEMORE_COMMAND_CHARACTERISTIC_UUID,
        ]));
        let driver = TimemoreDriver::new(transport.clone());
        (driver, transport)
    }

    #[tokio::test]
    async fn test_fragmented_frame_reassembled() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let data = weight_frame(1234);
        driver.handle_notification(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID, &data[..4]);
        assert_eq!(driver.weight(), 0.0);

        driver.handle_notification(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID, &data[4..]);
        assert_eq!(driver.weight(), 123.4);
    }

    #[tokio::test]
    async fn test_multiple_frames_per_delivery() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();
        let mut rx = driver.events();

        let mut data = weight_frame(100).to_vec();
        data.extend_from_slice(&weight_frame(200));
        driver.handle_notification(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID, &data);

        assert_eq!(driver.weight(), 20.0);
        assert_eq!(rx.try_recv().unwrap(), ScaleEvent::WeightUpdated(10.0));
        assert_eq!(rx.try_recv().unwrap(), ScaleEvent::WeightUpdated(20.0));
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_skipped() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let mut data = [0xFFu8; FRAME_LEN].to_vec();
        data.extend_from_slice(&weight_frame(55));
        driver.handle_notification(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID, &data);

        assert_eq!(driver.weight(), 5.5);
    }

    #[tokio::test]
    async fn test_negative_weight() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        driver.handle_notification(TIMEMORE_WEIGHT_CHARACTERISTIC_UUID, &weight_frame(-42));
        assert_eq!(driver.weight(), -4.2);
    }

    #[tokio::test]
    async fn test_handshake_writes_descriptor_then_enables() {
        let (mut driver, transport) = connected_driver();

        driver.connect().await.unwrap();

        assert_eq!(
            transport.descriptor_writes(),
            vec![(
                TIMEMORE_WEIGHT_CHARACTERISTIC_UUID,
                CCCD_UUID,
                vec![0x01, 0x00]
            )]
        );
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, vec![0x02, 0x00]);
        assert_eq!(
            transport.subscriptions(),
            vec![TIMEMORE_WEIGHT_CHARACTERISTIC_UUID]
        );
    }

    #[tokio::test]
    async fn test_tare_goes_to_command_channel() {
        let (mut driver, transport) = connected_driver();
        driver.connect().await.unwrap();
        transport.clear_writes();

        driver.tare().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, TIMEMORE_COMMAND_CHARACTERISTIC_UUID);
        assert_eq!(writes[0].1, vec![0x00]);
        assert_eq!(writes[0].2, WriteMode::WithAck);
    }
}
