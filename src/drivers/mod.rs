//! Scale drivers.
//!
//! One driver per supported vendor protocol, all implementing the
//! [`ScaleDriver`] trait. Drivers share a common connection lifecycle
//! through [`ScaleSession`](session::ScaleSession) and differ in their
//! handshake sequence, wire codec, and keep-alive behavior.
//!
//! Driver methods that mutate state take `&mut self`: inbound notification
//! handling, the periodic update tick, and connect/disconnect must never
//! run concurrently for one driver instance. The [`Scale`](crate::Scale)
//! facade enforces this with a single async mutex.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod session;

pub mod acaia;
pub mod bookoo;
pub mod decent;
pub mod difluid;
pub mod eclair;
pub mod eureka;
pub mod felicita;
pub mod timemore;
pub mod varia;

pub use acaia::AcaiaDriver;
pub use bookoo::BookooDriver;
pub use decent::DecentDriver;
pub use difluid::DifluidDriver;
pub use eclair::EclairDriver;
pub use eureka::EurekaDriver;
pub use felicita::FelicitaDriver;
pub use session::ScaleSession;
pub use timemore::TimemoreDriver;
pub use varia::VariaDriver;

/// Connection state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DriverState {
    /// Not connected to the scale.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and handshake complete; weight data flows.
    Connected,
}

impl DriverState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Event emitted by a driver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScaleEvent {
    /// A weight frame was decoded. Fired once per frame, grams.
    WeightUpdated(f32),
    /// Battery level changed, percent.
    BatteryUpdated(u8),
    /// Shot timer reading, seconds.
    TimerUpdated(u32),
    /// Flow rate reading, grams per second.
    FlowRateUpdated(f32),
    /// The connection state changed.
    StateChanged(DriverState),
    /// A diagnostic line, mirroring the driver's log output.
    LogLine(String),
}

/// A vendor scale driver.
///
/// Lifecycle contract shared by every implementation:
///
/// - `connect()` is a no-op when already connected; otherwise it
///   establishes the link, runs the vendor handshake, and only then
///   reports `Connected`. A failed handshake tears the link back down.
/// - `update()` is called by the host roughly once per second. It retries
///   a pending reconnect, detects silent link loss, and sends the vendor
///   keep-alive when due. Failures degrade to "will retry next tick",
///   never to an error.
/// - `disconnect()` is idempotent and safe in any state.
/// - Command methods (`tare()` and friends) fail with
///   [`Error::NotConnected`] when no link is up.
#[async_trait]
pub trait ScaleDriver: Send + Sync {
    /// Plugin identifier, e.g. `"acaia"`.
    fn id(&self) -> &'static str;

    /// Connect to the scale and run the vendor handshake.
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the scale. Idempotent.
    async fn disconnect(&mut self) -> Result<()>;

    /// Periodic tick: reconnect handling, link probing, keep-alive.
    async fn update(&mut self);

    /// Zero the scale.
    async fn tare(&mut self) -> Result<()>;

    /// Start the shot timer, on scales that have one.
    async fn start_timer(&mut self) -> Result<()> {
        Err(Error::NotSupported {
            operation: "start_timer".to_string(),
        })
    }

    /// Stop the shot timer, on scales that have one.
    async fn stop_timer(&mut self) -> Result<()> {
        Err(Error::NotSupported {
            operation: "stop_timer".to_string(),
        })
    }

    /// Reset the shot timer, on scales that have one.
    async fn reset_timer(&mut self) -> Result<()> {
        Err(Error::NotSupported {
            operation: "reset_timer".to_string(),
        })
    }

    /// Toggle the display unit, on scales that support it.
    async fn toggle_unit(&mut self) -> Result<()> {
        Err(Error::NotSupported {
            operation: "toggle_unit".to_string(),
        })
    }

    /// Toggle the display precision, on scales that support it.
    async fn toggle_precision(&mut self) -> Result<()> {
        Err(Error::NotSupported {
            operation: "toggle_precision".to_string(),
        })
    }

    /// Live connection probe against the transport.
    async fn is_connected(&self) -> bool;

    /// Feed inbound notification bytes from a subscribed channel.
    fn handle_notification(&mut self, channel: Uuid, data: &[u8]);

    /// Subscribe to driver events.
    fn events(&self) -> broadcast::Receiver<ScaleEvent>;

    /// Current connection state snapshot.
    fn state(&self) -> DriverState;

    /// Last decoded weight in grams.
    fn weight(&self) -> f32;

    /// Last reported battery level in percent, if any.
    fn battery(&self) -> Option<u8>;

    /// Last reported shot timer value in seconds, if any.
    fn timer_seconds(&self) -> Option<u32>;
}
