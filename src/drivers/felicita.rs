//! Felicita scale driver (Arc, Incline).
//!
//! Protocol: one characteristic (FFE1) carries both directions. Status
//! deliveries are at least 18 bytes; the weight is ASCII-encoded:
//!
//! ```text
//! | 0 | 1 |  2   | 3 .. 8 | 9 ..
//! | header | sign | digits | unit, flags, ...
//! ```
//!
//! The sign byte is `'-'` for negative readings, the six digit bytes are
//! ASCII decimal, and the resulting integer is in hundredths of a gram.
//! Commands are single bytes written with acknowledgement. The scale
//! expects a poke every update tick to keep the link warm.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::FELICITA_DATA_CHARACTERISTIC_UUID;
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Minimum delivery length carrying a status update.
const MIN_DELIVERY_LEN: usize = 18;

/// Zero the scale.
const CMD_TARE: u8 = 0x54;
/// Cycle the display unit (g / oz).
const CMD_TOGGLE_UNIT: u8 = 0x55;
/// Cycle the display precision.
const CMD_TOGGLE_PRECISION: u8 = 0x44;
/// Keep-alive, sent every update tick.
const HEARTBEAT: [u8; 1] = [0x00];

/// Parse the ASCII weight field: sign at offset 2, six digits at 3..=8,
/// value in hundredths of a gram.
fn parse_weight(data: &[u8]) -> Option<f32> {
    let mut value: i32 = 0;
    for &digit in &data[3..9] {
        if !digit.is_ascii_digit() {
            return None;
        }
        value = value * 10 + i32::from(digit - b'0');
    }
    let sign = if data[2] == b'-' { -1.0 } else { 1.0 };
    Some(sign * value as f32 / 100.0)
}

/// Decode one notification delivery. The codec validates per delivery;
/// there is no reassembly across deliveries.
fn decode_delivery(data: &[u8]) -> Option<Frame> {
    if data.len() < MIN_DELIVERY_LEN {
        return None;
    }
    parse_weight(data).map(|grams| Frame::Weight { grams })
}

/// Driver for Felicita scales.
pub struct FelicitaDriver {
    session: ScaleSession,
}

impl FelicitaDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("felicita", transport),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        if !self
            .session
            .transport()
            .has_channel(FELICITA_DATA_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "data characteristic not found".to_string(),
            });
        }

        self.session
            .transport()
            .subscribe(FELICITA_DATA_CHARACTERISTIC_UUID)
            .await?;

        Ok(())
    }

    async fn send_command(&mut self, command: u8) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }
        self.session
            .transport()
            .write(
                FELICITA_DATA_CHARACTERISTIC_UUID,
                &[command],
                WriteMode::WithAck,
            )
            .await
    }
}

#[async_trait]
impl ScaleDriver for FelicitaDriver {
    fn id(&self) -> &'static str {
        "felicita"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("felicita: already connected");
            return Ok(());
        }

        self.session.establish_link().await?;

        if let Err(e) = self.handshake().await {
            self.session.log(format!("Handshake failed: {}", e));
            self.session.teardown_link().await;
            return Err(e);
        }

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
                debug!("felicita: reconnect failed: {}", e);
            }
            return;
        }

        if !self.session.check_link().await {
            return;
        }

        // No interval gate: this scale wants a poke on every tick.
        if let Err(e) = self
            .session
            .transport()
            .write(
                FELICITA_DATA_CHARACTERISTIC_UUID,
                &HEARTBEAT,
                WriteMode::WithAck,
            )
            .await
        {
            debug!("felicita: heartbeat write failed: {}", e);
        }
    }

    async fn tare(&mut self) -> Result<()> {
        self.send_command(CMD_TARE).await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn toggle_unit(&mut self) -> Result<()> {
        self.send_command(CMD_TOGGLE_UNIT).await
    }

    async fn toggle_precision(&mut self) -> Result<()> {
        self.send_command(CMD_TOGGLE_PRECISION).await
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != FELICITA_DATA_CHARACTERISTIC_UUID {
            return;
        }

        match decode_delivery(data) {
            Some(frame) => self.session.push_frame(frame),
            None => self
                .session
                .warn(format!("Discarding malformed delivery ({} bytes)", data.len())),
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

    fn delivery(sign: u8, digits: &[u8; 6]) -> Vec<u8> {
        let mut data = vec![0u8; MIN_DELIVERY_LEN];
        data[2] = sign;
        data[3..9].copy_from_slice(digits);
        data
    }

    fn connected_driver() -> (FelicitaDriver, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::with_channels(&[
            FELICITA_DATA_CHARACTERISTIC_UUID,
        ]));
        let driver = FelicitaDriver::new(transport.clone());
        (driver, transport)
    }

    #[test]
    fn test_decode_negative_ascii_weight() {
        let data = delivery(b'-', b"012345");
        assert_eq!(
            decode_delivery(&data),
            Some(Frame::Weight { grams: -123.45 })
        );
    }

    #[test]
    fn test_decode_positive_ascii_weight() {
        let data = delivery(b'+', b"000150");
        assert_eq!(decode_delivery(&data), Some(Frame::Weight { grams: 1.5 }));
    }

    #[test]
    fn test_short_delivery_rejected() {
        let data = vec![0u8; MIN_DELIVERY_LEN - 1];
        assert_eq!(decode_delivery(&data), None);
    }

    #[test]
    fn test_non_digit_payload_rejected() {
        let data = delivery(b'-', b"01a345");
        assert_eq!(decode_delivery(&data), None);
    }

    #[tokio::test]
    async fn test_connect_subscribes_to_data_channel() {
        let (mut driver, transport) = connected_driver();

        driver.connect().await.unwrap();

        assert_eq!(driver.state(), DriverState::Connected);
        assert_eq!(
            transport.subscriptions(),
            vec![FELICITA_DATA_CHARACTERISTIC_UUID]
        );
    }

    #[tokio::test]
    async fn test_tare_requires_connection() {
        let (mut driver, _transport) = connected_driver();

        let result = driver.tare().await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_tare_sends_command_byte() {
        let (mut driver, transport) = connected_driver();
        driver.connect().await.unwrap();
        transport.clear_writes();

        driver.tare().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, vec![CMD_TARE]);
        assert_eq!(writes[0].2, WriteMode::WithAck);
    }

    #[tokio::test]
    async fn test_heartbeat_sent_every_tick() {
        let (mut driver, transport) = connected_driver();
        driver.connect().await.unwrap();
        transport.clear_writes();

        driver.update().await;
        driver.update().await;

        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, vec![0x00]);
        assert_eq!(writes[1].1, vec![0x00]);
    }

    #[tokio::test]
    async fn test_notification_updates_weight() {
        let (mut driver, _transport) = connected_driver();
        driver.connect().await.unwrap();
        let mut rx = driver.events();

        driver.handle_notification(
            FELICITA_DATA_CHARACTERISTIC_UUID,
            &delivery(b'+', b"001820"),
        );

        assert_eq!(driver.weight(), 18.2);
        assert_eq!(rx.try_recv().unwrap(), ScaleEvent::WeightUpdated(18.2));
    }

    #[tokio::test]
    async fn test_handshake_fails_without_channel() {
        let transport = Arc::new(FakeTransport::new());
        let mut driver = FelicitaDriver::new(transport.clone());

        let result = driver.connect().await;

        assert!(result.is_err());
        assert_eq!(driver.state(), DriverState::Disconnected);
        // The half-open link was torn down.
        assert_eq!(transport.disconnect_count(), 1);
    }
}
