//! Acaia scale driver (Lunar, Pearl, Pyxis, Umbra).
//!
//! Every message shares one envelope; checksums cover the payload only:
//!
//! ```text
//! | 0    | 1    | 2    | 3      | ...  | n-2 | n-1 |
//! | 0xEF | 0xDD | type | length | data | ck1 | ck2 |
//! ```
//!
//! The length byte counts itself plus the data, ck1 is the wrapping sum
//! of the even payload indices and ck2 of the odd ones. Three UUID
//! generations exist: a legacy single characteristic that carries both
//! directions, the common weight/command pair, and the Umbra pair. The
//! Umbra speaks the same protocol but moves the weight to bytes 2..4 of
//! the weight payload, big-endian.
//!
//! The scale goes quiet unless an identify message and a notification
//! request are sent after subscribing, and it drops the link without a
//! heartbeat burst every two seconds.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::scanner::DiscoveredDevice;
use crate::ble::transport::{Transport, WriteMode};
use crate::ble::uuids::{
    ACAIA_COMMAND_CHARACTERISTIC_UUID, ACAIA_LEGACY_CHARACTERISTIC_UUID,
    ACAIA_UMBRA_COMMAND_CHARACTERISTIC_UUID, ACAIA_UMBRA_WEIGHT_CHARACTERISTIC_UUID,
    ACAIA_WEIGHT_CHARACTERISTIC_UUID, CCCD_UUID,
};
use crate::drivers::session::ScaleSession;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameBuffer};
use crate::utils;

const HEADER1: u8 = 0xEF;
const HEADER2: u8 = 0xDD;

const HEADER_LEN: usize = 3;
const CHECKSUM_LEN: usize = 2;
const MIN_MESSAGE_LEN: usize = HEADER_LEN + CHECKSUM_LEN + 1;

const EVENT_WEIGHT: u8 = 0x05;
const EVENT_BATTERY: u8 = 0x06;
const EVENT_TIMER: u8 = 0x07;
const EVENT_KEY: u8 = 0x08;
const EVENT_ACK: u8 = 0x0B;

const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];
const ID_PAYLOAD: [u8; 15] = [0x2D; 15];

const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_millis(2000);

/// Message type byte at offset 2.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    System = 0x00,
    Tare = 0x04,
    Handshake = 0x06,
    Info = 0x07,
    Status = 0x08,
    Identify = 0x0B,
    Event = 0x0C,
}

impl MessageType {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::System),
            0x04 => Some(Self::Tare),
            0x06 => Some(Self::Handshake),
            0x07 => Some(Self::Info),
            0x08 => Some(Self::Status),
            0x0B => Some(Self::Identify),
            0x0C => Some(Self::Event),
            _ => None,
        }
    }
}

/// Wrapping sums of the even and odd payload indices.
fn split_checksum(payload: &[u8]) -> (u8, u8) {
    let mut even: u8 = 0;
    let mut odd: u8 = 0;
    for (i, &byte) in payload.iter().enumerate() {
        if i % 2 == 0 {
            even = even.wrapping_add(byte);
        } else {
            odd = odd.wrapping_add(byte);
        }
    }
    (even, odd)
}

fn encode_message(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + HEADER_LEN + CHECKSUM_LEN);
    message.push(HEADER1);
    message.push(HEADER2);
    message.push(msg_type as u8);
    message.extend_from_slice(payload);
    let (ck1, ck2) = split_checksum(payload);
    message.push(ck1);
    message.push(ck2);
    message
}

/// Characteristic pair picked during the handshake; legacy scales use
/// one characteristic for both directions.
#[derive(Clone, Copy)]
struct ChannelPair {
    weight: Uuid,
    command: Uuid,
}

fn select_channels(transport: &dyn Transport) -> Option<ChannelPair> {
    if transport.has_channel(ACAIA_LEGACY_CHARACTERISTIC_UUID) {
        return Some(ChannelPair {
            weight: ACAIA_LEGACY_CHARACTERISTIC_UUID,
            command: ACAIA_LEGACY_CHARACTERISTIC_UUID,
        });
    }
    if transport.has_channel(ACAIA_WEIGHT_CHARACTERISTIC_UUID)
        && transport.has_channel(ACAIA_COMMAND_CHARACTERISTIC_UUID)
    {
        return Some(ChannelPair {
            weight: ACAIA_WEIGHT_CHARACTERISTIC_UUID,
            command: ACAIA_COMMAND_CHARACTERISTIC_UUID,
        });
    }
    if transport.has_channel(ACAIA_UMBRA_WEIGHT_CHARACTERISTIC_UUID)
        && transport.has_channel(ACAIA_UMBRA_COMMAND_CHARACTERISTIC_UUID)
    {
        return Some(ChannelPair {
            weight: ACAIA_UMBRA_WEIGHT_CHARACTERISTIC_UUID,
            command: ACAIA_UMBRA_COMMAND_CHARACTERISTIC_UUID,
        });
    }
    None
}

/// Driver for Acaia scales.
pub struct AcaiaDriver {
    session: ScaleSession,
    buffer: FrameBuffer,
    device_name: String,
    channels: Option<ChannelPair>,
}

impl AcaiaDriver {
    /// Create a driver for a discovered device. The device name decides
    /// the Umbra weight layout and the Pearl S info-message exception.
    pub fn new(device: &DiscoveredDevice, transport: Arc<dyn Transport>) -> Self {
        Self {
            session: ScaleSession::new("acaia", transport),
            buffer: FrameBuffer::new(),
            device_name: device.name.clone(),
            channels: None,
        }
    }

    fn is_umbra(&self) -> bool {
        self.device_name.contains("UMBRA")
    }

    async fn write_message(&self, msg_type: MessageType, payload: &[u8]) -> Result<()> {
        let channel = match &self.channels {
            Some(pair) => pair.command,
            None => return Err(Error::NotConnected),
        };
        let message = encode_message(msg_type, payload);
        self.session
            .transport()
            .write(channel, &message, WriteMode::NoAck)
            .await
    }

    /// Event messages wrap their data with a leading length byte that
    /// counts itself.
    async fn send_event(&self, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push((data.len() + 1) as u8);
        payload.extend_from_slice(data);
        self.write_message(MessageType::Event, &payload).await
    }

    async fn send_notification_request(&self) -> Result<()> {
        self.send_event(&[0, 1, 1, 2, 2, 5, 3, 4]).await
    }

    async fn send_heartbeat(&self) -> Result<()> {
        self.write_message(MessageType::System, &[0x02, 0x00]).await?;
        self.send_notification_request().await?;
        self.write_message(MessageType::Handshake, &[0x00]).await?;
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        let channels = match select_channels(self.session.transport()) {
            Some(channels) => channels,
            None => {
                return Err(Error::HandshakeFailed {
                    reason: "no compatible characteristics found".to_string(),
                })
            }
        };
        self.channels = Some(channels);

        self.session
            .transport()
            .write_descriptor(channels.weight, CCCD_UUID, &ENABLE_NOTIFICATIONS)
            .await?;

        self.write_message(MessageType::Identify, &ID_PAYLOAD).await?;
        self.send_notification_request().await?;

        self.session.transport().subscribe(channels.weight).await?;
        if channels.command != channels.weight {
            self.session.transport().subscribe(channels.command).await?;
        }

        Ok(())
    }

    fn discard_junk(&mut self) {
        let slice = self.buffer.as_slice();
        match slice.windows(2).position(|w| w == [HEADER1, HEADER2]) {
            Some(0) => {}
            Some(start) => {
                self.session
                    .warn(format!("Skipping {} bytes before message header", start));
                self.buffer.consume(start);
            }
            None => {
                // A trailing 0xEF may be a header split across deliveries.
                let len = self.buffer.len();
                if len > 0 {
                    let keep = self.buffer.as_slice()[len - 1] == HEADER1;
                    self.buffer.consume(if keep { len - 1 } else { len });
                }
            }
        }
    }

    fn drain_buffer(&mut self) {
        loop {
            self.discard_junk();

            if self.buffer.len() < MIN_MESSAGE_LEN {
                return;
            }

            let message_len =
                HEADER_LEN + self.buffer.as_slice()[3] as usize + CHECKSUM_LEN;
            if message_len > self.buffer.len() {
                return;
            }

            let message = self.buffer.as_slice()[..message_len].to_vec();
            self.buffer.consume(message_len);

            let payload = &message[HEADER_LEN..message_len - CHECKSUM_LEN];
            let (ck1, ck2) = split_checksum(payload);
            if ck1 != message[message_len - 2] || ck2 != message[message_len - 1] {
                self.session.warn(format!(
                    "Checksum failed: calculated {:02x} {:02x}, received {:02x} {:02x}",
                    ck1,
                    ck2,
                    message[message_len - 2],
                    message[message_len - 1]
                ));
                // Later messages stay buffered for the next delivery.
                return;
            }

            self.handle_message(&message);
        }
    }

    fn handle_message(&mut self, message: &[u8]) {
        let payload = &message[HEADER_LEN..message.len() - CHECKSUM_LEN];
        match MessageType::from_raw(message[2]) {
            Some(MessageType::Event) => self.handle_event(payload),
            Some(MessageType::Status) => self.handle_status(payload),
            Some(MessageType::Info) => {
                self.session
                    .log(format!("Got info message: {}", utils::hex_string(message)));
                // The Pearl S announces itself this way right after
                // connecting; on every other model an info message means
                // the link is unusable.
                if !self.device_name.starts_with("PEARLS") {
                    self.session.mark_for_reconnect();
                }
            }
            _ => self.session.log(format!(
                "Unknown message type {:02x}: {}",
                message[2],
                utils::hex_string(message)
            )),
        }
    }

    fn handle_event(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }

        match payload[1] {
            EVENT_WEIGHT => {
                if payload.len() >= 8 {
                    if let Some(grams) = self.decode_weight(&payload[2..8]) {
                        self.session.push_frame(Frame::Weight { grams });
                    }
                }
            }
            EVENT_ACK => self.session.push_frame(Frame::Heartbeat),
            EVENT_BATTERY => {
                if payload.len() >= 3 {
                    self.session.push_frame(Frame::Battery {
                        percent: payload[2] & 0x7F,
                    });
                }
            }
            EVENT_TIMER => {
                if payload.len() >= 4 {
                    let seconds = u32::from(payload[2]) * 60 + u32::from(payload[3]);
                    self.session.push_frame(Frame::Timer { seconds });
                }
            }
            EVENT_KEY => {}
            other => self
                .session
                .log(format!("Unknown event type {:02x}", other)),
        }
    }

    fn handle_status(&mut self, payload: &[u8]) {
        if payload.len() < 3 {
            return;
        }

        self.session.push_frame(Frame::Battery {
            percent: payload[1] & 0x7F,
        });

        match payload[2] {
            2 => trace!("acaia: unit is grams"),
            5 => trace!("acaia: unit is ounces"),
            other => trace!("acaia: unknown unit {:02x}", other),
        }
    }

    fn decode_weight(&mut self, weight: &[u8]) -> Option<f32> {
        let raw = if self.is_umbra() {
            (u16::from(weight[2]) << 8) | u16::from(weight[3])
        } else {
            (u16::from(weight[1]) << 8) | u16::from(weight[0])
        };

        let divisor = match weight[4] {
            1 => 10.0,
            2 => 100.0,
            3 => 1000.0,
            4 => 10000.0,
            other => {
                self.session.warn(format!(
                    "Invalid weight scaling {:02x} - {}",
                    other,
                    utils::hex_string(weight)
                ));
                return None;
            }
        };

        let mut grams = f32::from(raw) / divisor;
        if weight[5] & 0x02 != 0 {
            grams = -grams;
        }
        Some(grams)
    }
}

#[async_trait]
impl ScaleDriver for AcaiaDriver {
    fn id(&self) -> &'static str {
        "acaia"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected().await {
            debug!("acaia: already connected");
            return Ok(());
        }

        self.session.establish_link().await?;

        if let Err(e) = self.handshake().await {
            self.session.log(format!("Handshake failed: {}", e));
            self.channels = None;
            self.session.teardown_link().await;
            return Err(e);
        }

        self.buffer.clear();
        self.session.finish_connect();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.session.teardown_link().await;
        self.channels = None;
        Ok(())
    }

    async fn update(&mut self) {
        if self.session.reconnect_pending() {
            self.session.log("Reconnecting");
            self.session.teardown_link().await;
            if let Err(e) = self.connect().await {
                debug!("acaia: reconnect failed: {}", e);
            }
            return;
        }

        if !self.session.check_link().await {
            return;
        }

        if self.session.heartbeat_due(HEARTBEAT_INTERVAL) {
            if let Err(e) = self.send_heartbeat().await {
                debug!("acaia: heartbeat write failed: {}", e);
            }
        }
    }

    async fn tare(&mut self) -> Result<()> {
        if !self.session.is_connected().await {
            return Err(Error::NotConnected);
        }

        self.write_message(MessageType::Tare, &[0x00]).await?;
        self.session.log("Tare command sent");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    fn handle_notification(&mut self, channel: Uuid, data: &[u8]) {
        let accepted = match &self.channels {
            Some(pair) => channel == pair.weight || channel == pair.command,
            None => false,
        };
        if !accepted {
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
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn device(name: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            name: name.to_string(),
            address: "aa:bb:cc:dd:ee:ff".to_string(),
            manufacturer_data: Vec::new(),
            rssi: Some(-60),
            discovered_at: Utc::now(),
        }
    }

    fn standard_transport() -> Arc<FakeTransport> {
        Arc::new(FakeTransport::with_channels(&[
            ACAIA_WEIGHT_CHARACTERISTIC_UUID,
            ACAIA_COMMAND_CHARACTERISTIC_UUID,
        ]))
    }

    async fn connected_driver(name: &str) -> (AcaiaDriver, Arc<FakeTransport>) {
        let transport = standard_transport();
        let mut driver = AcaiaDriver::new(&device(name), transport.clone());
        driver.connect().await.unwrap();
        (driver, transport)
    }

    fn weight_event(raw: u16, scaling: u8, negative: bool) -> Vec<u8> {
        let mut payload = vec![0x08, EVENT_WEIGHT];
        payload.extend_from_slice(&[
            (raw & 0xFF) as u8,
            (raw >> 8) as u8,
            0x00,
            0x00,
            scaling,
            if negative { 0x02 } else { 0x00 },
        ]);
        encode_message(MessageType::Event, &payload)
    }

    fn umbra_weight_event(raw: u16, scaling: u8) -> Vec<u8> {
        let mut payload = vec![0x08, EVENT_WEIGHT];
        payload.extend_from_slice(&[
            0x00,
            0x00,
            (raw >> 8) as u8,
            (raw & 0xFF) as u8,
            scaling,
            0x00,
        ]);
        encode_message(MessageType::Event, &payload)
    }

    #[test]
    fn test_split_checksum_even_and_odd() {
        let (ck1, ck2) = split_checksum(&[0x09, 0x00, 0x01, 0x01, 0x02, 0x02, 0x05, 0x03, 0x04]);
        assert_eq!(ck1, 0x15);
        assert_eq!(ck2, 0x06);
    }

    #[test]
    fn test_tare_message_bytes() {
        assert_eq!(
            encode_message(MessageType::Tare, &[0x00]),
            vec![0xEF, 0xDD, 0x04, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_identify_message_bytes() {
        let mut expected = vec![0xEF, 0xDD, 0x0B];
        expected.extend_from_slice(&[0x2D; 15]);
        expected.extend_from_slice(&[0x68, 0x3B]);
        assert_eq!(encode_message(MessageType::Identify, &ID_PAYLOAD), expected);
    }

    #[test]
    fn test_heartbeat_message_bytes() {
        assert_eq!(
            encode_message(MessageType::System, &[0x02, 0x00]),
            vec![0xEF, 0xDD, 0x00, 0x02, 0x00, 0x02, 0x00]
        );
        assert_eq!(
            encode_message(MessageType::Handshake, &[0x00]),
            vec![0xEF, 0xDD, 0x06, 0x00, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_handshake_identifies_and_requests_notifications() {
        let (_driver, transport) = connected_driver("LUNAR-1234").await;

        assert_eq!(
            transport.descriptor_writes(),
            vec![(
                ACAIA_WEIGHT_CHARACTERISTIC_UUID,
                CCCD_UUID,
                vec![0x01, 0x00]
            )]
        );

        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, encode_message(MessageType::Identify, &ID_PAYLOAD));
        assert_eq!(
            writes[1].1,
            vec![0xEF, 0xDD, 0x0C, 0x09, 0x00, 0x01, 0x01, 0x02, 0x02, 0x05, 0x03, 0x04, 0x15, 0x06]
        );
        assert!(writes.iter().all(|w| w.0 == ACAIA_COMMAND_CHARACTERISTIC_UUID));

        assert_eq!(
            transport.subscriptions(),
            vec![
                ACAIA_WEIGHT_CHARACTERISTIC_UUID,
                ACAIA_COMMAND_CHARACTERISTIC_UUID
            ]
        );
    }

    #[tokio::test]
    async fn test_legacy_channel_serves_both_directions() {
        let transport = Arc::new(FakeTransport::with_channels(&[
            ACAIA_LEGACY_CHARACTERISTIC_UUID,
        ]));
        let mut driver = AcaiaDriver::new(&device("PEARL-5678"), transport.clone());

        driver.connect().await.unwrap();

        // One characteristic, one subscription.
        assert_eq!(
            transport.subscriptions(),
            vec![ACAIA_LEGACY_CHARACTERISTIC_UUID]
        );

        driver.handle_notification(ACAIA_LEGACY_CHARACTERISTIC_UUID, &weight_event(1234, 1, false));
        assert_eq!(driver.weight(), 123.4);
    }

    #[tokio::test]
    async fn test_standard_weight_is_little_endian() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &weight_event(1234, 1, false));
        assert_eq!(driver.weight(), 123.4);
    }

    #[tokio::test]
    async fn test_umbra_weight_is_big_endian() {
        let (mut driver, _transport) = connected_driver("UMBRA-9").await;

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &umbra_weight_event(1234, 1));
        assert_eq!(driver.weight(), 123.4);
    }

    #[tokio::test]
    async fn test_scaling_selects_divisor() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &weight_event(1234, 2, false));
        assert_eq!(driver.weight(), 12.34);

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &weight_event(1234, 3, false));
        assert_eq!(driver.weight(), 1.234);
    }

    #[tokio::test]
    async fn test_invalid_scaling_discards_reading() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &weight_event(1234, 9, false));
        assert_eq!(driver.weight(), 0.0);
    }

    #[tokio::test]
    async fn test_sign_bit_negates() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &weight_event(55, 1, true));
        assert_eq!(driver.weight(), -5.5);
    }

    #[tokio::test]
    async fn test_junk_before_header_is_skipped() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        let mut data = vec![0x00, 0x12, 0x34];
        data.extend(weight_event(100, 1, false));
        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &data);
        assert_eq!(driver.weight(), 10.0);
    }

    #[tokio::test]
    async fn test_checksum_failure_stops_drain_until_next_delivery() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        let mut bad = weight_event(1234, 1, false);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let mut data = bad;
        data.extend(weight_event(500, 1, false));

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &data);
        // The corrupted message is discarded and the drain stops; the
        // message behind it stays buffered.
        assert_eq!(driver.weight(), 0.0);

        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &weight_event(200, 1, false));
        assert_eq!(driver.weight(), 20.0);
    }

    #[tokio::test]
    async fn test_status_message_carries_battery() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        // High bit of the battery byte is a charging flag.
        let message = encode_message(MessageType::Status, &[0x03, 0xCB, 0x02]);
        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &message);
        assert_eq!(driver.battery(), Some(0x4B));
    }

    #[tokio::test]
    async fn test_battery_event_reports_percent() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        let message = encode_message(MessageType::Event, &[0x03, EVENT_BATTERY, 0xD7]);
        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &message);
        assert_eq!(driver.battery(), Some(0x57));
    }

    #[tokio::test]
    async fn test_timer_event_reports_seconds() {
        let (mut driver, _transport) = connected_driver("LUNAR-1234").await;

        let message = encode_message(MessageType::Event, &[0x05, EVENT_TIMER, 0x02, 0x0B, 0x03]);
        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &message);
        assert_eq!(driver.timer_seconds(), Some(131));
    }

    #[tokio::test]
    async fn test_info_message_forces_reconnect() {
        let (mut driver, transport) = connected_driver("LUNAR-1234").await;
        assert_eq!(transport.connect_count(), 1);

        let message = encode_message(MessageType::Info, &[0x01]);
        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &message);

        driver.update().await;
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_pearl_s_info_message_is_ignored() {
        let (mut driver, transport) = connected_driver("PEARLS-1").await;

        let message = encode_message(MessageType::Info, &[0x01]);
        driver.handle_notification(ACAIA_WEIGHT_CHARACTERISTIC_UUID, &message);

        driver.update().await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_tare_requires_connection() {
        let transport = standard_transport();
        let mut driver = AcaiaDriver::new(&device("LUNAR-1234"), transport);

        assert!(matches!(driver.tare().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_tare_writes_to_command_channel() {
        let (mut driver, transport) = connected_driver("LUNAR-1234").await;
        transport.clear_writes();

        driver.tare().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, ACAIA_COMMAND_CHARACTERISTIC_UUID);
        assert_eq!(writes[0].1, vec![0xEF, 0xDD, 0x04, 0x00, 0x00, 0x00]);
        assert_eq!(writes[0].2, WriteMode::NoAck);
    }
}
