//! Difluid Microbalance scale driver.
//!
//! Every packet in both directions shares one shape:
//!
//! ```text
//! | 0    | 1    | 2    | 3   | 4       | 5 ..      | last |
//! | 0xDF | 0xDF | func | cmd | dataLen | data ...  | sum  |
//! ```
//!
//! The trailer is the additive checksum (mod 256) of everything before
//! it. Sensor data (func 0x03, cmd 0x00) carries the weight as a signed
//! 32-bit big-endian value in tenths of a gram at offset 5. The device
//! status reply (func 0x03, cmd 0x05) doubles as the heartbeat ack and
//! carries the battery percentage at offset 6.
//!
//! The handshake forces the unit to grams and enables unsolicited
//! sensor notifications; after that a status poll every two seconds
//! keeps the link alive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::DIFLUID_DATA_CHARACTERISTIC_UUID;
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::checksum;
use crate::protocol::Frame;

const HEADER: u8 = 0xDF;

const FUNC_SETTING: u8 = 0x01;
const FUNC_SENSOR: u8 = 0x03;

const CMD_SENSOR_DATA: u8 = 0x00;
const CMD_DEVICE_STATUS: u8 = 0x05;

/// Command bodies; the sum trailer is appended at send time.
const CMD_TARE: [u8; 6] = [HEADER, HEADER, FUNC_SENSOR, 0x02, 0x01, 0x01];
const CMD_UNIT_GRAMS: [u8; 6] = [HEADER, HEADER, FUNC_SETTING, 0x04, 0x01, 0x00];
const CMD_AUTO_NOTIFY: [u8; 6] = [HEADER, HEADER, FUNC_SETTING, 0x00, 0x01, 0x01];
const CMD_HEARTBEAT: [u8; 5] = [HEADER, HEADER, FUNC_SENSOR, CMD_DEVICE_STATUS, 0x00];

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

/// Driver for Difluid Microbalance scales.
pub struct DifluidDriver {
    session: ScaleSession,
}

impl DifluidDriver {
    /// Create a driver over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("difluid", transport),
        }
    }

    async fn write_packet(&self, body: &[u8]) -> Result<()> {
        let packet = checksum::append_sum_trailer(body);
        self.session
            .transport()
            .write(DIFLUID_DATA_CHARACTERISTIC_UUID, &packet, WriteMode::WithAck)
            .await
    }

    async fn handshake(&mut self) -> Result<()> {
        if !self
            .session
            .transport()
            .has_channel(DIFLUID_DATA_CHARACTERISTIC_UUID)
        {
            return Err(Error::HandshakeFailed {
                reason: "data characteristic not found".to_string(),
            });
        }

        self.session
            .transport()
            .subscribe(DIFLUID_DATA_CHARACTERISTIC_UUID)
            .await?;

        self.write_packet(&CMD_UNIT_GRAMS).await?;
        self.write_packet(&CMD_AUTO_NOTIFY).await?;

        Ok(())
    }

    fn handle_frame(&mut self, data: &[u8]) {
        let func = data[2];
        let cmd = data[3];
        let data_len = data[4] as usize;

        match (func, cmd) {
            (FUNC_SENSOR, CMD_SENSOR_DATA) => {
                if data_len < 13 || data.len() < 6 + data_len {
                    self.session.warn("Discarding truncated sensor data");
                    return;
                }
                let raw = i32::from_be_bytes([data[5], data[6], data[7], data[8]]);
                self.session.push_frame(Frame::Weight {
                    grams: raw as f32 / 10.0,
                });
            }
            (FUNC_SENSOR, CMD_DEVICE_STATUS) => {
                if data.len() >= 8 {
                    self.session.push_frame(Frame::Battery { percent: data[6] });
                }
            }
            (FUNC_SETTING, _) => {
                // Ack of one of our setting writes.
                self.session.push_frame(Frame::Heartbeat);
            }
            _ => self.session.push_frame(Frame::Unknown),
        }
    }
}

#[async_trait]
impl ScaleDriver for DifluidDriver {
    fn id(&self) -> &'static str {
        "difluid"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("difluid: already connected");
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
                debug!("difluid: reconnect failed: {}", e);
            }
            return;
        }

        if !self.session.check_link().await {
            return;
        }

        if self.session.heartbeat_due(HEARTBEAT_INTERVAL) {
            if let Err(e) = self.write_packet(&CMD_HEARTBEAT).await {
                debug!("difluid: heartbeat write failed: {}", e);
            }
        }
    }

    async fn tare(&mut self) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }

        self.write_packet(&CMD_TARE).await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        if channel != DIFLUID_DATA_CHARACTERISTIC_UUID {
            return;
        }

        if data.len() < 6 || data[0] != HEADER || data[1] != HEADER {
            self.session.warn("Discarding malformed delivery");
            return;
        }

        if !checksum::verify_sum_trailer(data) {
            self.session.warn(format!(
                "Checksum mismatch: received {:02x}, calculated {:02x}",
                data[data.len() - 1],
                checksum::sum_mod256(&data[..data.len() - 1])
            ));
            return;
        }

        self.handle_frame(data);
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
