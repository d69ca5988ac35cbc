//! Eureka Precisa scale driver.
//!
//! Weight notifications arrive on FFF1 and may be fragmented; deliveries
//! are buffered until at least 11 bytes are available:
//!
//! ```text
//! | 0 .. 5 | 6    | 7      | 8       | 9 .. 10 |
//! | header | sign | w low  | w high  | trailer |
//! ```
//!
//! The 16-bit little-endian value at 7..9 is in tenths of a gram, and a
//! non-zero byte 6 marks the reading negative. There is no checksum; the
//! buffer is cleared wholesale after each decode, so a delivery carrying
//! more than one frame only yields the first.
//!
//! Commands go to FFF2 without acknowledgement and repeat their opcode
//! byte: `AA 02 op op 00 00`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    EUREKA_COMMAND_CHARACTERISTIC_UUID, EUREKA_WEIGHT_CHARACTERISTIC_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameBuffer};

/// Shortest buffer content that decodes to a reading.
const FRAME_LEN: usize = 11;

const CMD_TARE: u8 = 0x31;
const CMD_START_TIMER: u8 = 0x33;
const CMD_STOP_TIMER: u8 = 0x34;
const CMD_RESET_TIMER: u8 = 0x35;

/// Build a command packet: the opcode byte appears twice.
fn command(op: u8) -> [u8; 6] {
    [0xAA, 0x02, op, op, 0x00, 0x00]
}

fn decode_frame(data: &[u8]) -> Frame {
    let raw = (i32::from(data[8]) << 8) + i32::from(data[7]);
    let mut grams = raw as f32 / 10.0;
    if data[6] != 0 {
        grams = -grams;
    }
    Frame::Weight { grams }
}

/// Driver for Eureka Precisa scales.
pub struct EurekaDriver {
    session: ScaleSession,
    buffer: FrameBuffer,
}

impl EurekaDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("eureka", transport),
            buffer: FrameBuffer::new(),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let transport = self.session.transport();
        if !transport.has_channel(EUREKA_WEIGHT_CHARACTERISTIC_UUID)
            || !transport.has_channel(EUREKA_COMMAND_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "weight or command characteristic not found".to_string(),
            });
        }

        transport.subscribe(EUREKA_WEIGHT_CHARACTERISTIC_UUID).await?;
        transport.subscribe(EUREKA_COMMAND_CHARACTERISTIC_UUID).await?;

        Ok(())
    }

    async fn send_command(&mut self, op: u8) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }
        self.session
            .transport()
            .write(
                EUREKA_COMMAND_CHARACTERISTIC_UUID,
                &command(op),
                WriteMode::NoAck,
            )
            .await
    }
}

#[async_trait]
impl ScaleDriver for EurekaDriver {
    fn id(&self) -> &'static str {
        "eureka"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("eureka: already connected");
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
                debug!("eureka: reconnect failed: {}", e);
            }
            return;
        }

        // No keep-alive traffic; the link check is the whole tick.
        self.session.check_link().await;
    }

    async fn tare(&mut self) -> Result<()> {
        self.send_command(CMD_TARE).await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn start_timer(&mut self) -> Result<()> {
        self.send_command(CMD_START_TIMER).await
    }

    async fn stop_timer(&mut self) -> Result<()> {
        self.send_command(CMD_STOP_TIMER).await
    }

    async fn reset_timer(&mut self) -> Result<()> {
        self.send_command(CMD_RESET_TIMER).await
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != EUREKA_WEIGHT_CHARACTERISTIC_UUID {
            return;
        }

        self.buffer.extend(data);
        if self.buffer.len() < FRAME_LEN {
            return;
        }

        let frame = decode_frame(self.buffer.as_slice());
        self.buffer.clear();
        self.session.push_frame(frame);
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

    fn frame(sign: u8, tenths: u16) -> [u8; FRAME_LEN] {
        let mut data = [0u8; FRAME_LEN];
        data[6] = sign;
        data[7] = (tenths & 0xFF) as u8;
        data[8] = (tenths >> 8) as u8;
        data
    }

    fn connected_driver() -> (EurekaDriver, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::with_channels(&[
            EUREKA_WEIGHT_CHARACTERISTIC_UUID,
            EUREKA_COMMAND_CHARACTERISTIC_UUID,
        ]));
        let driver = EurekaDriver::new(transport.clone());
        (driver, transport)
    }

    #[test]
    fn test_command_repeats_opcode() {
        assert_eq!(command(0x31), [0xAA, 0x02, 0x31, 0x31, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_fragmented_delivery_is_reassembled() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let data = frame(0, 1234);
        driver.handle_notification(EUREKA_WEIGHT_CHARACTERISTIC_UUID, &data[..6]);
        assert_eq!(driver.weight(), 0.0);

        driver.handle_notification(EUREKA_WEIGHT_CHARACTERISTIC_UUID, &data[6..]);
        assert_eq!(driver.weight(), 123.4);
    }

    #[tokio::test]
    async fn test_negative_flag_inverts_sign() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        driver.handle_notification(EUREKA_WEIGHT_CHARACTERISTIC_UUID, &frame(1, 55));
        assert_eq!(driver.weight(), -5.5);
    }

    #[tokio::test]
    async fn test_oversized_delivery_yields_first_frame_only() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let mut data = frame(0, 500).to_vec();
        data.extend_from_slice(&frame(0, 999));
        driver.handle_notification(EUREKA_WEIGHT_CHARACTERISTIC_UUID, &data);
        assert_eq!(driver.weight(), 50.0);

        // The trailing frame was dropped with the rest of the buffer, so a
        // fresh delivery decodes from a clean slate.
        driver.handle_notification(EUREKA_WEIGHT_CHARACTERISTIC_UUID, &frame(0, 10));
        assert_eq!(driver.weight(), 1.0);
    }

    #[tokio::test]
    async fn test_tare_packet_bytes() {
        let (mut driver, transport) = connected_driver();
        driver.connect().await.unwrap();
        transport.clear_writes();

        driver.tare().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, EUREKA_COMMAND_CHARACTERISTIC_UUID);
        assert_eq!(writes[0].1, vec![0xAA, 0x02, 0x31, 0x31, 0x00, 0x00]);
        assert_eq!(writes[0].2, WriteMode::NoAck);
    }

    #[tokio::test]
    async fn test_timer_command_bytes() {
        let (mut driver, transport) = connected_driver();
        driver.connect().await.unwrap();
        transport.clear_writes();

        driver.start_timer().await.unwrap();
        driver.stop_timer().await.unwrap();
        driver.reset_timer().await.unwrap();

        let ops: Vec<u8> = transport.writes().iter().map(|w| w.1[2]).collect();
        assert_eq!(ops, vec![0x33, 0x34, 0x35]);
    }

    #[tokio::test]
    async fn test_handshake_needs_both_channels() {
        let transport = Arc::new(FakeTransport::with_channels(&[
            EUREKA_WEIGHT_CHARACTERISTIC_UUID,
        ]));
        let mut driver = EurekaDriver::new(transport);

        assert!(driver.connect().await.is_err());
        assert_eq!(driver.state(), DriverState::Disconnected);
    }
}
