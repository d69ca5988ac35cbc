//! Decent Scale driver.
//!
//! Notifications arrive on FFF4 as 7- or 10-byte packets:
//!
//! ```text
//! | 0    | 1    | 2      | 3     | ...  | last |
//! | 0x03 | 0xCE | w high | w low | ...  | xor  |
//! ```
//!
//! The weight is a signed 16-bit big-endian value in tenths of a gram.
//! The final byte is the XOR of everything before it, except that some
//! firmware revisions send 0x00 there; a zero trailer is accepted as-is.
//! Button presses arrive in the same envelope under a different type
//! byte and carry no reading.
//!
//! The scale is quiet between readings and needs no keep-alive. Commands
//! are written to the notify characteristic, which also accepts writes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    DECENT_READ_CHARACTERISTIC_UUID, DECENT_WRITE_CHARACTERISTIC_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::checksum;
use crate::protocol::Frame;

const HEADER_MODEL: u8 = 0x03;
const TYPE_WEIGHT: u8 = 0xCE;

/// Tare packet; the trailer is the XOR of the preceding bytes.
const CMD_TARE: [u8; 7] = [0x03, 0x0F, 0x00, 0x00, 0x00, 0x00, 0x0C];

fn checksum_ok(data: &[u8]) -> bool {
    let declared = data[data.len() - 1];
    declared == 0 || checksum::xor(&data[..data.len() - 1]) == declared
}

/// Driver for Decent scales.
pub struct DecentDriver {
    session: ScaleSession,
}

impl DecentDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("decent", transport),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let transport = self.session.transport();
        if !transport.has_channel(DECENT_READ_CHARACTERISTIC_UUID)
            || !transport.has_channel(DECENT_WRITE_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "read or write characteristic not found".to_string(),
            });
        }

        transport.subscribe(DECENT_READ_CHARACTERISTIC_UUID).await?;

        Ok(())
    }
}

#[async_trait]
impl ScaleDriver for DecentDriver {
    fn id(&self) -> &'static str {
        "decent"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("decent: already connected");
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
                debug!("decent: reconnect failed: {}", e);
            }
            return;
        }

        self.session.check_link().await;
    }

    async fn tare(&mut self) -> Result<()> {
        if !self.session.is_connected().await || self.session.reconnect_pending() {
            return Err(Error::NotConnected);
        }

        self.session
            .transport()
            .write(DECENT_READ_CHARACTERISTIC_UUID, &CMD_TARE, WriteMode::NoAck)
            .await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != DECENT_READ_CHARACTERISTIC_UUID {
            return;
        }

        if data.len() != 7 && data.len() != 10 {
            self.session
                .warn(format!("Discarding delivery of {} bytes", data.len()));
            return;
        }

        if data[0] != HEADER_MODEL {
            self.session
                .warn(format!("Discarding delivery with header {:02x}", data[0]));
            return;
        }

        if !checksum_ok(data) {
            self.session.warn("Discarding delivery with bad checksum");
            return;
        }

        if data[1] != TYPE_WEIGHT {
            // Button presses and settings echoes share the envelope.
            self.session.push_frame(Frame::Unknown);
            return;
        }

        let grams = i16::from_be_bytes([data[2], data[3]]) as f32 / 10.0;
        self.session.push_frame(Frame::Weight { grams });
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
