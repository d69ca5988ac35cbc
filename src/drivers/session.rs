//! Shared driver session state.
//!
//! Every vendor driver embeds a [`ScaleSession`]: the connection state
//! machine, the reconnect flag, heartbeat bookkeeping, last-known reading
//! snapshots, and the event broadcast. Drivers stay small because the
//! lifecycle plumbing lives here; only the handshake, codec, and command
//! bytes are vendor code.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::ble::transport::Transport;
use crate::drivers::{DriverState, ScaleEvent};
use crate::error::Result;
use crate::protocol::Frame;

/// Connection lifecycle and reading state shared by all drivers.
pub struct ScaleSession {
    /// Plugin identifier, used as a log prefix.
    id: &'static str,
    /// The transport this session drives.
    transport: Arc<dyn Transport>,
    /// Current connection state.
    state: DriverState,
    /// Set on detected link loss or failed connect; cleared only by a
    /// successful connect.
    pending_reconnect: bool,
    /// When the last heartbeat was sent.
    last_heartbeat: Option<Instant>,
    /// Last decoded weight in grams.
    weight: f32,
    /// Last reported battery percent.
    battery: Option<u8>,
    /// Last reported timer value in seconds.
    timer_seconds: Option<u32>,
    /// Channel for driver events.
    event_tx: broadcast::Sender<ScaleEvent>,
}

impl ScaleSession {
    /// Create a session over a transport.
    pub fn new(id: &'static str, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            id,
            transport,
            state: DriverState::Disconnected,
            pending_reconnect: false,
            last_heartbeat: None,
            weight: 0.0,
            battery: None,
            timer_seconds: None,
            event_tx,
        }
    }

    /// The transport this session drives.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Current connection state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Last decoded weight in grams.
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Last reported battery percent, if any.
    pub fn battery(&self) -> Option<u8> {
        self.battery
    }

    /// Last reported timer value in seconds, if any.
    pub fn timer_seconds(&self) -> Option<u32> {
        self.timer_seconds
    }

    /// Whether a reconnect is pending.
    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect
    }

    /// Subscribe to driver events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScaleEvent> {
        self.event_tx.subscribe()
    }

    /// Update the connection state and emit an event on change.
    pub fn set_state(&mut self, new_state: DriverState) {
        if self.state != new_state {
            debug!("{}: state {} -> {}", self.id, self.state, new_state);
            self.state = new_state;
            let _ = self.event_tx.send(ScaleEvent::StateChanged(new_state));
        }
    }

    /// Flag the session for reconnection on the next update tick.
    pub fn mark_for_reconnect(&mut self) {
        if !self.pending_reconnect {
            self.pending_reconnect = true;
            self.log("Connection lost, will reconnect");
        }
    }

    /// Clear the reconnect flag. Called only after a successful connect.
    pub fn clear_reconnect(&mut self) {
        self.pending_reconnect = false;
    }

    /// Live probe: state says connected and the link answers.
    pub async fn is_connected(&self) -> bool {
        self.state.is_connected() && self.transport.is_link_alive().await
    }

    /// Establish the transport link and enumerate channels.
    ///
    /// Leaves the session in `Connecting`; the caller runs the vendor
    /// handshake and then [`finish_connect`](Self::finish_connect). Any
    /// failure tears the link down and leaves the session `Disconnected`.
    pub async fn establish_link(&mut self) -> Result<()> {
        self.set_state(DriverState::Connecting);

        if let Err(e) = self.transport.connect().await {
            self.log(format!("Link establishment failed: {}", e));
            self.set_state(DriverState::Disconnected);
            return Err(e);
        }

        if let Err(e) = self.transport.discover_channels().await {
            self.log(format!("Channel discovery failed: {}", e));
            self.teardown_link().await;
            return Err(e);
        }

        Ok(())
    }

    /// Tear down the transport link unconditionally.
    pub async fn teardown_link(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            trace!("{}: teardown disconnect failed: {}", self.id, e);
        }
        self.set_state(DriverState::Disconnected);
    }

    /// Complete a successful connect: zero the weight, go `Connected`,
    /// clear the reconnect flag, restart the heartbeat clock.
    pub fn finish_connect(&mut self) {
        self.set_weight(0.0);
        self.set_state(DriverState::Connected);
        self.clear_reconnect();
        self.reset_heartbeat();
        self.log("Connected");
    }

    /// Detect silent link loss while nominally connected.
    ///
    /// Returns `false` (and flags a reconnect) when the link died under us.
    pub async fn check_link(&mut self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        if !self.transport.is_link_alive().await {
            self.mark_for_reconnect();
            return false;
        }
        true
    }

    /// Restart the heartbeat clock.
    pub fn reset_heartbeat(&mut self) {
        self.last_heartbeat = Some(Instant::now());
    }

    /// Check whether the keep-alive interval has elapsed; resets the clock
    /// when it has.
    pub fn heartbeat_due(&mut self, interval: Duration) -> bool {
        let due = match self.last_heartbeat {
            Some(last) => last.elapsed() >= interval,
            None => true,
        };
        if due {
            self.reset_heartbeat();
        }
        due
    }

    /// Record a new weight reading and emit an event.
    pub fn set_weight(&mut self, grams: f32) {
        self.weight = grams;
        let _ = self.event_tx.send(ScaleEvent::WeightUpdated(grams));
    }

    /// Record a battery reading. Emits an event on change only; scales
    /// that stream continuously repeat the level in every packet.
    pub fn set_battery(&mut self, percent: u8) {
        if self.battery != Some(percent) {
            self.battery = Some(percent);
            let _ = self.event_tx.send(ScaleEvent::BatteryUpdated(percent));
        }
    }

    /// Record a timer reading. Emits an event on change only.
    pub fn set_timer(&mut self, seconds: u32) {
        if self.timer_seconds != Some(seconds) {
            self.timer_seconds = Some(seconds);
            let _ = self.event_tx.send(ScaleEvent::TimerUpdated(seconds));
        }
    }

    /// Route a decoded frame into the session state.
    pub fn push_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Weight { grams } => self.set_weight(grams),
            Frame::Battery { percent } => self.set_battery(percent),
            Frame::Timer { seconds } => self.set_timer(seconds),
            Frame::FlowRate { grams_per_sec } => {
                let _ = self
                    .event_tx
                    .send(ScaleEvent::FlowRateUpdated(grams_per_sec));
            }
            Frame::Heartbeat => {
                trace!("{}: heartbeat ack", self.id);
            }
            Frame::Unknown => {
                trace!("{}: unrecognized frame", self.id);
            }
        }
    }

    /// Emit a diagnostic line to both the log and the event stream.
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}: {}", self.id, message);
        let _ = self.event_tx.send(ScaleEvent::LogLine(message));
    }

    /// Emit a protocol warning: logged louder, same event mirror.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}: {}", self.id, message);
        let _ = self.event_tx.send(ScaleEvent::LogLine(message));
    }
}
