//! Varia AKU scale driver.
//!
//! A single notification may concatenate several sub-messages, each
//! with its own header, payload and trailer:
//!
//! ```text
//! | 0    | 1    | 2        | 3 ..    | last |
//! | 0xFA | type | pay len  | payload | xor  |
//! ```
//!
//! The trailer is the XOR of the bytes between header and trailer. The
//! walk stops at the first sub-message that fails validation; anything
//! decoded before that point stands.
//!
//! Weight payloads pack sign and magnitude into three bytes: bit 0x10
//! of the first payload byte is the sign, the remaining 20 bits are the
//! magnitude in hundredths of a gram.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    VARIA_COMMAND_CHARACTERISTIC_UUID, VARIA_WEIGHT_CHARACTERISTIC_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::checksum;
use crate::protocol::Frame;

const HEADER: u8 = 0xFA;

const TYPE_WEIGHT: u8 = 0x01;
const TYPE_BATTERY: u8 = 0x85;
const TYPE_TIMER: u8 = 0x87;
const TYPE_TIMER_START: u8 = 0x88;
const TYPE_TIMER_STOP: u8 = 0x89;
const TYPE_TIMER_RESET: u8 = 0x8A;

/// Tare packet; the trailer is the XOR of bytes 1..=3.
const CMD_TARE: [u8; 5] = [0xFA, 0x82, 0x01, 0x01, 0x82];

/// Total sub-message length for a known message type.
fn sub_len(msg_type: u8) -> Option<usize> {
    match msg_type {
        TYPE_WEIGHT => Some(7),
        TYPE_TIMER => Some(6),
        TYPE_BATTERY | TYPE_TIMER_START | TYPE_TIMER_STOP | TYPE_TIMER_RESET => Some(5),
        _ => None,
    }
}

/// Driver for Varia AKU scales.
pub struct VariaDriver {
    session: ScaleSession,
}

impl VariaDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("varia", transport),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let transport = self.session.transport();
        if !transport.has_channel(VARIA_WEIGHT_CHARACTERISTIC_UUID)
            || !transport.has_channel(VARIA_COMMAND_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "weight or command characteristic not found".to_string(),
            });
        }

        transport.subscribe(VARIA_WEIGHT_CHARACTERISTIC_UUID).await?;

        Ok(())
    }

    fn handle_sub_message(&mut self, sub: &[u8]) {
        match sub[1] {
            TYPE_WEIGHT => {
                let raw = (i32::from(sub[3] & 0x0F) << 16)
                    + (i32::from(sub[4]) << 8)
                    + i32::from(sub[5]);
                let mut grams = raw as f32 / 100.0;
                if sub[3] & 0x10 != 0 {
                    grams = -grams;
                }
                self.session.push_frame(Frame::Weight { grams });
            }
            TYPE_TIMER => {
                let seconds = (u32::from(sub[3]) << 8) + u32::from(sub[4]);
                self.session.push_frame(Frame::Timer { seconds });
            }
            TYPE_BATTERY => {
                self.session.push_frame(Frame::Battery { percent: sub[3] });
            }
            TYPE_TIMER_START => self.session.log("Timer started on scale"),
            TYPE_TIMER_STOP => self.session.log("Timer stopped on scale"),
            TYPE_TIMER_RESET => self.session.log("Timer reset on scale"),
            _ => {}
        }
    }
}

#[async_trait]
impl ScaleDriver for VariaDriver {
    fn id(&self) -> &'static str {
        "varia"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("varia: already connected");
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
                debug!("varia: reconnect failed: {}", e);
            }
            return;
        }

        self.session.check_link().await;
    }

    async fn tare(&mut self) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }

        self.session
            .transport()
            .write(VARIA_COMMAND_CHARACTERISTIC_UUID, &CMD_TARE, WriteMode::NoAck)
            .await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != VARIA_WEIGHT_CHARACTERISTIC_UUID {
            return;
        }

        if data.len() < 2 || data[0] != HEADER {
            self.session.warn("Discarding delivery without header");
            return;
        }

        let mut offset = 0;
        while offset < data.len() {
            let rest = &data[offset..];
            if rest.len() < 2 || rest[0] != HEADER {
                self.session.warn("Stopping at malformed sub-message");
                return;
            }

            let len = match sub_len(rest[1]) {
                Some(len) => len,
                None => {
                    self.session
                        .warn(format!("Stopping at unknown message type {:02x}", rest[1]));
                    return;
                }
            };

            if rest.len() < len {
                self.session.warn("Stopping at truncated sub-message");
                return;
            }

            let sub = &rest[..len];
            if checksum::xor(&sub[1..len - 1]) != sub[len - 1] {
                self.session.warn("Stopping at sub-message with bad checksum");
                return;
            }

            self.handle_sub_message(sub);
            offset += len;
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
