//! BLE communication module.
//!
//! This module provides low-level Bluetooth Low Energy functionality
//! for discovering and communicating with smart scales: the scanner,
//! the abstract transport interface drivers program against, and its
//! btleplug-backed implementation.

pub mod peripheral;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use peripheral::BlePeripheralTransport;
pub use scanner::{DiscoveredDevice, ScaleScanner, ScanEvent};
pub use transport::{Notification, Transport, WriteMode};
pub use uuids::*;
