//! Bookoo Themis scale driver.
//!
//! The scale streams 20-byte frames on FF11, reassembled through a
//! buffer because deliveries fragment and occasionally carry junk
//! between frames:
//!
//! ```text
//! | 0    | 1    | 2 .. 5    | 6 .. 7 | 8 .. 9 | 10   | 11    | .. | 19  |
//! | 0x03 | 0x0B | ms u32 LE | weight | flow   | batt | timer | .. | xor |
//! ```
//!
//! Weight and flow rate are signed 16-bit little-endian values in
//! hundredths of a gram (per second); the trailer is the XOR of the
//! first 19 bytes. One frame yields a weight, a flow rate and a battery
//! reading.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    BOOKOO_COMMAND_CHARACTERISTIC_UUID, BOOKOO_WEIGHT_CHARACTERISTIC_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::checksum;
use crate::protocol::{Frame, FrameBuffer};

const HEADER_PRODUCT: u8 = 0x03;
const TYPE_WEIGHT_STREAM: u8 = 0x0B;

const FRAME_LEN: usize = 20;

/// Command packets as the vendor app sends them. Only the tare trailer
/// matches the frame checksum rule, so these are never recomputed.
const CMD_TARE: [u8; 6] = [0x03, 0x0A, 0x01, 0x00, 0x00, 0x08];
const CMD_START_TIMER: [u8; 6] = [0x03, 0x0A, 0x04, 0x00, 0x00, 0x0A];
const CMD_STOP_TIMER: [u8; 6] = [0x03, 0x0A, 0x05, 0x00, 0x00, 0x0D];
const CMD_RESET_TIMER: [u8; 6] = [0x03, 0x0A, 0x06, 0x00, 0x00, 0x0C];

fn find_header(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .position(|w| w == [HEADER_PRODUCT, TYPE_WEIGHT_STREAM])
}

/// Driver for Bookoo Themis scales.
pub struct BookooDriver {
    session: ScaleSession,
    buffer: FrameBuffer,
}

impl BookooDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("bookoo", transport),
            buffer: FrameBuffer::new(),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let transport = self.session.transport();
        if !transport.has_channel(BOOKOO_WEIGHT_CHARACTERISTIC_UUID)
            || !transport.has_channel(BOOKOO_COMMAND_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "weight or command characteristic not found".to_string(),
            });
        }

        transport.subscribe(BOOKOO_WEIGHT_CHARACTERISTIC_UUID).await?;

        Ok(())
    }

    async fn send_command(&mut self, packet: &[u8]) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }
        self.session
            .transport()
            .write(BOOKOO_COMMAND_CHARACTERISTIC_UUID, packet, WriteMode::NoAck)
            .await
    }

    fn drain_buffer(&mut self) {
        loop {
            match find_header(self.buffer.as_slice()) {
                Some(0) => {}
                Some(junk) => {
                    self.session
                        .warn(format!("Skipping {} bytes before frame header", junk));
                    self.buffer.consume(junk);
                }
                None => {
                    // A trailing 0x03 may be a header split across
                    // deliveries; everything else is junk.
                    let len = self.buffer.len();
                    if len > 0 {
                        let keep = self.buffer.as_slice()[len - 1] == HEADER_PRODUCT;
                        self.buffer.consume(if keep { len - 1 } else { len });
                    }
                    return;
                }
            }

            if self.buffer.len() < FRAME_LEN {
                return;
            }

            let frame = self.buffer.as_slice()[..FRAME_LEN].to_vec();
            self.buffer.consume(FRAME_LEN);

            if !checksum::verify_xor_trailer(&frame) {
                self.session.warn("Discarding frame with bad checksum");
                continue;
            }

            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let timestamp_ms = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        trace!(
            "bookoo: frame at {} ms, timer running: {}",
            timestamp_ms,
            frame[11] != 0
        );

        let grams = i16::from_le_bytes([frame[6], frame[7]]) as f32 / 100.0;
        let flow = i16::from_le_bytes([frame[8], frame[9]]) as f32 / 100.0;

        self.session.push_frame(Frame::Weight { grams });
        self.session.push_frame(Frame::FlowRate {
            grams_per_sec: flow,
        });
        self.session.push_frame(Frame::Battery {
            percent: frame[10],
        });
    }
}

#[async_trait]
impl ScaleDriver for BookooDriver {
    fn id(&self) -> &'static str {
        "bookoo"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("bookoo: already connected");
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
                debug!("bookoo: reconnect failed: {}", e);
            }
            return;
        }

        self.session.check_link().await;
    }

    async fn tare(&mut self) -> Result<()> {
        self.send_command(&CMD_TARE).await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn start_timer(&mut self) -> Result<()> {
        self.send_command(&CMD_START_TIMER).await
    }

    async fn stop_timer(&mut self) -> Result<()> {
        self.send_command(&CMD_STOP_TIMER).await
    }

    async fn reset_timer(&mut self) -> Result<()> {
        self.send_command(&CMD_RESET_TIMER).await
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != BOOKOO_WEIGHT_CHARACTERISTIC_UUID {
            return;
        }

        self.buffer.extend(data);
        self.drain_buffer();
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

    fn frame(weight: i16, flow: i16, battery: u8) -> [u8; FRAME_LEN] {
        let mut f = [0u8; FRAME_LEN];
        f[0] = HEADER_PRODUCT;
        f[1] = TYPE_WEIGHT_STREAM;
        f[6..8].copy_from_slice(&weight.to_le_bytes());
        f[8..10].copy_from_slice(&flow.to_le_bytes());
        f[10] = battery;
        f[19] = checksum::xor(&f[..19]);
        f
    }

    fn connected_driver() -> (BookooDriver, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::with_channels(&[
            BOOKOO_WEIGHT_CHARACTERISTIC_UUID,
            BOOKOO_COMMAND_CHARACTERISTIC_UUID,
        ]));
        let driver = BookooDriver::new(transport.clone());
        (driver, transport)
    }

    #[tokio::test]
    async fn test_frame_yields_weight_flow_and_battery() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();
        let mut rx = driver.events();

        driver.handle_notification(
            BOOKOO_WEIGHT_CHARACTERISTIC_UUID,
            &frame(1820, 25, 90),
        );

        assert_eq!(driver.weight(), 18.2);
        assert_eq!(driver.battery(), Some(90));
        assert_eq!(rx.try_recv().unwrap(), ScaleEvent::WeightUpdated(18.2));
        assert_eq!(rx.try_recv().unwrap(), ScaleEvent::FlowRateUpdated(0.25));
        assert_eq!(rx.try_recv().unwrap(), ScaleEvent::BatteryUpdated(90));
    }

    #[tokio::test]
    async fn test_junk_before_header_is_skipped() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let mut data = vec![0xAA, 0x55, 0x00];
        data.extend_from_slice(&frame(500, 0, 80));
        driver.handle_notification(BOOKOO_WEIGHT_CHARACTERISTIC_UUID, &data);

        assert_eq!(driver.weight(), 5.0);
    }

    #[tokio::test]
    async fn test_fragmented_frame_reassembled() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let data = frame(1234, 0, 70);
        driver.handle_notification(BOOKOO_WEIGHT_CHARACTERISTIC_UUID, &data[..9]);
        assert_eq!(driver.weight(), 0.0);

        driver.handle_notification(BOOKOO_WEIGHT_CHARACTERISTIC_UUID, &data[9..]);
        assert_eq!(driver.weight(), 12.34);
    }

    #[tokio::test]
    async fn test_header_split_across_deliveries() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let data = frame(100, 0, 60);
        // Junk, then only the first header byte.
        driver.handle_notification(BOOKOO_WEIGHT_CHARACTERISTIC_UUID, &[0xFF, 0xFF, 0x03]);
        driver.handle_notification(BOOKOO_WEIGHT_CHARACTERISTIC_UUID, &data[1..]);

        assert_eq!(driver.weight(), 1.0);
    }

    #[tokio::test]
    async fn test_bad_checksum_frame_dropped() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();

        let mut bad = frame(9999, 0, 50);
        bad[19] ^= 0xFF;
        let mut data = bad.to_vec();
        data.extend_from_slice(&frame(200, 0, 50));
        driver.handle_notification(BOOKOO_WEIGHT_CHARACTERISTIC_UUID, &data);

        // The corrupted frame is consumed, the one behind it decodes.
        assert_eq!(driver.weight(), 2.0);
    }

    #[tokio::test]
    async fn test_command_bytes() {
        let (mut driver, transport) = connected_driver();
        driver.connect().await.unwrap();
        transport.clear_writes();

        driver.tare().await.unwrap();
        driver.start_timer().await.unwrap();
        driver.stop_timer().await.unwrap();
        driver.reset_timer().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0].1, vec![0x03, 0x0A, 0x01, 0x00, 0x00, 0x08]);
        assert_eq!(writes[1].1, vec![0x03, 0x0A, 0x04, 0x00, 0x00, 0x0A]);
        assert_eq!(writes[2].1, vec![0x03, 0x0A, 0x05, 0x00, 0x00, 0x0D]);
        assert_eq!(writes[3].1, vec![0x03, 0x0A, 0x06, 0x00, 0x00, 0x0C]);
        assert!(writes.iter().all(|w| w.0 == BOOKOO_COMMAND_CHARACTERISTIC_UUID));
    }
}
