//! Scale handle and callback registration.
//!
//! [`Scale`] pairs a boxed driver with the background task that pumps
//! transport notifications into it. Host calls and the pump share one async
//! mutex, so a driver never handles inbound bytes and an update tick at the
//! same time.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ble::transport::Transport;
use crate::drivers::{DriverState, ScaleDriver, ScaleEvent};
use crate::error::Result;

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Last-seen values, readable without taking the driver lock.
#[derive(Debug, Clone, Copy, Default)]
struct ScaleSnapshot {
    state: DriverState,
    weight: f32,
    battery: Option<u8>,
    timer_seconds: Option<u32>,
}

/// Handle to one connected (or connectable) scale.
///
/// Wraps a [`ScaleDriver`] built by the registry. All driver calls go through
/// an async mutex shared with the notification pump; snapshot getters read a
/// separately guarded copy and never contend with in-flight operations.
pub struct Scale {
    /// Plugin identifier of the wrapped driver.
    id: &'static str,
    /// The driver, shared with the notification pump.
    driver: Arc<Mutex<Box<dyn ScaleDriver>>>,
    /// Last-seen values, updated by the event fan-out task.
    snapshot: Arc<RwLock<ScaleSnapshot>>,
    /// Re-broadcast of driver events for subscribers and callbacks.
    event_tx: broadcast::Sender<ScaleEvent>,
    /// Notification pump task.
    pump: JoinHandle<()>,
    /// Event fan-out task.
    fan_out: JoinHandle<()>,
    /// Callback ID counter.
    callback_counter: Arc<AtomicU64>,
}

impl Scale {
    /// Wrap a driver and start pumping the transport's notification stream
    /// into it. Spawns background tasks, so this must run inside a Tokio
    /// runtime.
    pub fn new(driver: Box<dyn ScaleDriver>, transport: &dyn Transport) -> Self {
        let id = driver.id();
        let mut driver_events = driver.events();
        let (event_tx, _) = broadcast::channel(64);
        let driver = Arc::new(Mutex::new(driver));
        let snapshot = Arc::new(RwLock::new(ScaleSnapshot::default()));

        // Pump inbound notifications into the driver's codec. Taking the
        // driver lock here is what serializes inbound bytes against host
        // calls like update() and tare().
        let pump_driver = Arc::clone(&driver);
        let mut notifications = transport.notifications();
        let pump = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => {
                        let mut driver = pump_driver.lock().await;
                        driver.handle_notification(notification.channel, &notification.data);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Notification pump lagged, dropped {} deliveries", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Mirror driver events into the snapshot and re-broadcast them.
        let fan_snapshot = Arc::clone(&snapshot);
        let fan_tx = event_tx.clone();
        let fan_out = tokio::spawn(async move {
            loop {
                match driver_events.recv().await {
                    Ok(event) => {
                        {
                            let mut snapshot = fan_snapshot.write();
                            match &event {
                                ScaleEvent::WeightUpdated(grams) => snapshot.weight = *grams,
                                ScaleEvent::BatteryUpdated(percent) => {
                                    snapshot.battery = Some(*percent)
                                }
                                ScaleEvent::TimerUpdated(seconds) => {
                                    snapshot.timer_seconds = Some(*seconds)
                                }
                                ScaleEvent::StateChanged(state) => snapshot.state = *state,
                                _ => {}
                            }
                        }
                        let _ = fan_tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            id,
            driver,
            snapshot,
            event_tx,
            pump,
            fan_out,
            callback_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Plugin identifier of the wrapped driver, e.g. `"acaia"`.
    pub fn id(&self) -> &'static str {
        self.id
    }

    // === Lifecycle ===

    /// Connect to the scale and run the vendor handshake.
    pub async fn connect(&self) -> Result<()> {
        self.driver.lock().await.connect().await
    }

    /// Disconnect from the scale. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.driver.lock().await.disconnect().await
    }

    /// Periodic tick: reconnect handling, link probing, keep-alive. Call at
    /// roughly one-second intervals while the scale is in use.
    pub async fn update(&self) {
        self.driver.lock().await.update().await
    }

    /// Live connection probe against the transport.
    pub async fn is_connected(&self) -> bool {
        self.driver.lock().await.is_connected().await
    }

    // === Commands ===

    /// Zero the scale.
    pub async fn tare(&self) -> Result<()> {
        self.driver.lock().await.tare().await
    }

    /// Start the shot timer, on scales that have one.
    pub async fn start_timer(&self) -> Result<()> {
        self.driver.lock().await.start_timer().await
    }

    /// Stop the shot timer, on scales that have one.
    pub async fn stop_timer(&self) -> Result<()> {
        self.driver.lock().await.stop_timer().await
    }

    /// Reset the shot timer, on scales that have one.
    pub async fn reset_timer(&self) -> Result<()> {
        self.driver.lock().await.reset_timer().await
    }

    /// Toggle the display unit, on scales that support it.
    pub async fn toggle_unit(&self) -> Result<()> {
        self.driver.lock().await.toggle_unit().await
    }

    /// Toggle the display precision, on scales that support it.
    pub async fn toggle_precision(&self) -> Result<()> {
        self.driver.lock().await.toggle_precision().await
    }

    // === Snapshots ===

    /// Last known connection state.
    pub fn state(&self) -> DriverState {
        self.snapshot.read().state
    }

    /// Last decoded weight in grams.
    pub fn weight(&self) -> f32 {
        self.snapshot.read().weight
    }

    /// Last reported battery level in percent, if any.
    pub fn battery(&self) -> Option<u8> {
        self.snapshot.read().battery
    }

    /// Last reported shot timer value in seconds, if any.
    pub fn timer_seconds(&self) -> Option<u32> {
        self.snapshot.read().timer_seconds
    }

    // === Events & callbacks ===

    /// Subscribe to scale events.
    pub fn events(&self) -> broadcast::Receiver<ScaleEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for decoded weights.
    pub fn on_weight_updated<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let ScaleEvent::WeightUpdated(grams) = event {
                    callback(grams);
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for driver log lines.
    pub fn on_log_line<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let ScaleEvent::LogLine(line) = event {
                    callback(&line);
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for every scale event.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ScaleEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                callback(&event);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

impl Drop for Scale {
    fn drop(&mut self) {
        self.pump.abort();
        self.fan_out.abort();
    }
}

impl std::fmt::Debug for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scale")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::testing::FakeTransport;
    use crate::ble::uuids::FELICITA_DATA_CHARACTERISTIC_UUID;
    use crate::drivers::FelicitaDriver;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn felicita_scale() -> (Scale, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::with_channels(&[
            FELICITA_DATA_CHARACTERISTIC_UUID,
        ]));
        let driver = Box::new(FelicitaDriver::new(transport.clone()));
        let scale = Scale::new(driver, transport.as_ref());
        (scale, transport)
    }

    fn weight_delivery(sign: u8, digits: &[u8; 6]) -> Vec<u8> {
        let mut data = vec![0u8; 18];
        data[2] = sign;
        data[3..9].copy_from_slice(digits);
        data
    }

    /// Let the spawned pump and fan-out tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_snapshot_defaults() {
        let (scale, _transport) = felicita_scale();

        assert_eq!(scale.state(), DriverState::Disconnected);
        assert_eq!(scale.weight(), 0.0);
        assert_eq!(scale.battery(), None);
        assert_eq!(scale.timer_seconds(), None);
        assert!(!scale.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_updates_snapshot_state() {
        let (scale, _transport) = felicita_scale();

        scale.connect().await.unwrap();
        settle().await;

        assert!(scale.is_connected().await);
        assert_eq!(scale.state(), DriverState::Connected);
        assert_eq!(scale.id(), "felicita");
    }

    #[tokio::test]
    async fn test_notification_pump_feeds_driver() {
        let (scale, transport) = felicita_scale();
        scale.connect().await.unwrap();
        settle().await;

        transport.push(
            FELICITA_DATA_CHARACTERISTIC_UUID,
            &weight_delivery(b'+', b"001820"),
        );
        settle().await;

        assert_eq!(scale.weight(), 18.2);
    }

    #[tokio::test]
    async fn test_events_carry_decoded_weight() {
        let (scale, transport) = felicita_scale();
        scale.connect().await.unwrap();
        settle().await;

        let mut rx = scale.events();
        transport.push(
            FELICITA_DATA_CHARACTERISTIC_UUID,
            &weight_delivery(b'-', b"012345"),
        );
        settle().await;

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ScaleEvent::WeightUpdated(-123.45));
    }

    #[tokio::test]
    async fn test_on_weight_updated_callback() {
        let (scale, transport) = felicita_scale();
        scale.connect().await.unwrap();
        settle().await;

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handle = scale.on_weight_updated(move |grams| {
            sink.lock().push(grams);
        });

        transport.push(
            FELICITA_DATA_CHARACTERISTIC_UUID,
            &weight_delivery(b'+', b"001820"),
        );
        settle().await;

        assert_eq!(*seen.lock(), vec![18.2]);
    }

    #[tokio::test]
    async fn test_callback_handle_unregisters_on_drop() {
        let (scale, transport) = felicita_scale();
        scale.connect().await.unwrap();
        settle().await;

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = scale.on_weight_updated(move |grams| {
            sink.lock().push(grams);
        });

        transport.push(
            FELICITA_DATA_CHARACTERISTIC_UUID,
            &weight_delivery(b'+', b"001000"),
        );
        settle().await;
        assert_eq!(seen.lock().len(), 1);

        drop(handle);
        settle().await;

        transport.push(
            FELICITA_DATA_CHARACTERISTIC_UUID,
            &weight_delivery(b'+', b"002000"),
        );
        settle().await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_on_log_line_reports_handshake_failure() {
        // No channels: the handshake cannot subscribe and fails.
        let transport = Arc::new(FakeTransport::new());
        let driver = Box::new(FelicitaDriver::new(transport.clone()));
        let scale = Scale::new(driver, transport.as_ref());

        let lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = lines.clone();
        let _handle = scale.on_log_line(move |line| {
            sink.lock().push(line.to_string());
        });

        assert!(scale.connect().await.is_err());
        settle().await;

        assert!(lines
            .lock()
            .iter()
            .any(|line| line.contains("Handshake failed")));
    }

    #[tokio::test]
    async fn test_on_event_sees_state_changes() {
        let (scale, _transport) = felicita_scale();

        let states = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = states.clone();
        let _handle = scale.on_event(move |event| {
            if let ScaleEvent::StateChanged(state) = event {
                sink.lock().push(*state);
            }
        });

        scale.connect().await.unwrap();
        settle().await;

        assert_eq!(
            *states.lock(),
            vec![DriverState::Connecting, DriverState::Connected]
        );
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (scale, _transport) = felicita_scale();

        assert!(matches!(scale.tare().await, Err(Error::NotConnected)));
        assert!(matches!(
            scale.toggle_unit().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_timer_commands_unsupported_on_felicita() {
        let (scale, _transport) = felicita_scale();
        scale.connect().await.unwrap();

        assert!(matches!(
            scale.start_timer().await,
            Err(Error::NotSupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_drives_heartbeat() {
        let (scale, transport) = felicita_scale();
        scale.connect().await.unwrap();
        transport.clear_writes();

        scale.update().await;

        assert_eq!(transport.writes().len(), 1);
    }
}
