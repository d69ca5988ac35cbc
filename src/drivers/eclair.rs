//! Eclair espresso scale driver.
//!
//! Two characteristics carry different traffic. The data channel
//! streams measurements as 10-byte frames:
//!
//! ```text
//! | 0    | 1 .. 4       | 5 .. 8  | 9   |
//! | type | i32 LE value | padding | xor |
//! ```
//!
//! Weight (`W`) values are thousandths of a gram, flow rate (`F`)
//! thousandths of a gram per second. The config channel answers with
//! short `type value xor` frames for battery (`B`) and timer status.
//! In every direction the trailer is the XOR of the bytes between the
//! type byte and the trailer; the type byte itself is not covered.
//!
//! Commands use the same framing on the config channel. Polling timer
//! status every two seconds doubles as the keep-alive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    ECLAIR_CONFIG_CHARACTERISTIC_UUID, ECLAIR_DATA_CHARACTERISTIC_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::checksum;
use crate::protocol::Frame;

const TYPE_WEIGHT: u8 = b'W';
const TYPE_FLOW_RATE: u8 = b'F';
const TYPE_TARE: u8 = b'T';
const TYPE_BATTERY: u8 = b'B';
const TYPE_TIMER_STATUS: u8 = 0x43;

const DATA_FRAME_LEN: usize = 10;
const CONFIG_FRAME_MIN_LEN: usize = 3;

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

/// Frame a command: type byte, payload, XOR of the payload.
fn command(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 2);
    packet.push(msg_type);
    packet.extend_from_slice(payload);
    packet.push(checksum::xor(payload));
    packet
}

/// Trailer check shared by both channels: XOR of everything between
/// the type byte and the trailer.
fn trailer_ok(data: &[u8]) -> bool {
    checksum::xor(&data[1..data.len() - 1]) == data[data.len() - 1]
}

/// Driver for Eclair espresso scales.
pub struct EclairDriver {
    session: ScaleSession,
}

impl EclairDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("eclair", transport),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let transport = self.session.transport();
        if !transport.has_channel(ECLAIR_DATA_CHARACTERISTIC_UUID)
            || !transport.has_channel(ECLAIR_CONFIG_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "data or config characteristic not found".to_string(),
            });
        }

        transport.subscribe(ECLAIR_DATA_CHARACTERISTIC_UUID).await?;
        transport.subscribe(ECLAIR_CONFIG_CHARACTERISTIC_UUID).await?;

        Ok(())
    }

    fn handle_data(&mut self, data: &[u8]) {
        if data.len() < DATA_FRAME_LEN {
            self.session
                .warn(format!("Discarding short data frame ({} bytes)", data.len()));
            return;
        }
        if !trailer_ok(data) {
            self.session.warn("Discarding data frame with bad checksum");
            return;
        }

        let raw = i32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let value = raw as f32 / 1000.0;

        match data[0] {
            TYPE_WEIGHT => self.session.push_frame(Frame::Weight { grams: value }),
            TYPE_FLOW_RATE => self.session.push_frame(Frame::FlowRate {
                grams_per_sec: value,
            }),
            other => self
                .session
                .log(format!("Unknown data frame type {:02x}", other)),
        }
    }

    fn handle_config(&mut self, data: &[u8]) {
        if data.len() < CONFIG_FRAME_MIN_LEN {
            self.session.warn(format!(
                "Discarding short config frame ({} bytes)",
                data.len()
            ));
            return;
        }
        if !trailer_ok(data) {
            self.session.warn("Discarding config frame with bad checksum");
            return;
        }

        let value = data[1];
        match data[0] {
            TYPE_BATTERY => self.session.push_frame(Frame::Battery { percent: value }),
            TYPE_TIMER_STATUS => self.session.push_frame(Frame::Timer {
                seconds: u32::from(value),
            }),
            other => self
                .session
                .log(format!("Unknown config frame type {:02x}", other)),
        }
    }
}

#[async_trait]
impl ScaleDriver for EclairDriver {
    fn id(&self) -> &'static str {
        "eclair"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("eclair: already connected");
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
                debug!("eclair: reconnect failed: {}", e);
            }
            return;
        }

        if !self.session.check_link().await {
            return;
        }

        if self.session.heartbeat_due(HEARTBEAT_INTERVAL) {
            let packet = command(TYPE_TIMER_STATUS, &[0x00]);
            if let Err(e) = self
                .session
                .transport()
                .write(ECLAIR_CONFIG_CHARACTERISTIC_UUID, &packet, WriteMode::NoAck)
                .await
            {
                debug!("eclair: heartbeat write failed: {}", e);
            }
        }
    }

    async fn tare(&mut self) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }

        let packet = command(TYPE_TARE, &[0x01]);
        self.session
            .transport()
            .write(
                ECLAIR_CONFIG_CHARACTERISTIC_UUID,
                &packet,
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
        if channel == ECLAIR_DATA_CHARACTERISTIC_UUID {
            self.handle_data(data);
        } else if channel == ECLAIR_CONFIG_CHARACTERISTIC_UUID {
            self.handle_config(data);
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
