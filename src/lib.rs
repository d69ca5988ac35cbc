// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # brewscale-ble
//!
//! A cross-platform Rust library for communicating with Bluetooth Low Energy
//! coffee scales.
//!
//! Nine vendor protocols are supported behind one driver interface: Acaia
//! (Lunar, Pyxis, Pearl and Umbra), Bookoo, Decent, Difluid, Eclair, Eureka
//! Precisa, Felicita, Timemore and Varia AKU.
//!
//! ## Features
//!
//! - **Scale Discovery**: scan for nearby scales and match them to a driver
//!   by advertised name or manufacturer data
//! - **Live Weight**: a decoded weight stream in grams, sign and scaling
//!   already applied
//! - **Commands**: tare on every scale; timer, unit and precision commands
//!   where the vendor protocol has them
//! - **Connection Care**: vendor keep-alives and automatic reconnection,
//!   driven by a once-a-second update tick
//! - **Extensible**: register your own driver plugin for unsupported scales
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brewscale_ble::{
//!     BlePeripheralTransport, DriverRegistry, Result, Scale, ScaleScanner, Transport,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = DriverRegistry::with_default_plugins();
//!
//!     // Scan until a supported scale shows up.
//!     let scanner = ScaleScanner::new().await?;
//!     scanner.start_scan().await?;
//!     let device = scanner
//!         .wait_for_match(&registry, Duration::from_secs(30))
//!         .await?;
//!     scanner.stop_scan().await?;
//!     println!("Found {} ({})", device.name, device.address);
//!
//!     // Build the matching driver and connect.
//!     let peripheral = scanner
//!         .peripheral_for(&device.address)
//!         .expect("matched device is still in the scan results");
//!     let transport: Arc<dyn Transport> = Arc::new(BlePeripheralTransport::new(peripheral));
//!     let driver = registry.create(&device, Arc::clone(&transport))?;
//!     let scale = Scale::new(driver, transport.as_ref());
//!     scale.connect().await?;
//!
//!     let _weights = scale.on_weight_updated(|grams| println!("{grams:.2} g"));
//!
//!     // Drive keep-alives and reconnection once a second.
//!     for _ in 0..30 {
//!         scale.update().await;
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!     }
//!
//!     scale.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. macOS reports peripherals by a
//! platform UUID rather than their MAC address.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for events, frames, and
//!   discovered devices

// Public modules
pub mod ble;
pub mod drivers;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod scale;
pub mod utils;

// Re-exports for convenience
pub use error::{Error, Result};
pub use registry::{DeviceMatcher, DriverFactory, DriverPlugin, DriverRegistry};
pub use scale::{CallbackHandle, Scale};
pub use utils::{grams_to_ounces, hex_string, ounces_to_grams};

// Re-export commonly used types from submodules
pub use ble::peripheral::BlePeripheralTransport;
pub use ble::scanner::{DiscoveredDevice, ScaleScanner, ScanEvent};
pub use ble::transport::{Notification, Transport, WriteMode};
pub use drivers::{DriverState, ScaleDriver, ScaleEvent, ScaleSession};
pub use protocol::{Frame, FrameBuffer};
