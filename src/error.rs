//! Error types for the brewscale-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Operation requires a connection but the scale is not connected.
    #[error("Scale not connected")]
    NotConnected,

    /// Failed to establish a connection to the scale.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The post-connect vendor handshake failed.
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// Description of which handshake step failed.
        reason: String,
    },

    /// Invalid frame data was received from the scale.
    #[error("Invalid frame: {context}")]
    InvalidFrame {
        /// Description of what was invalid about the frame.
        context: String,
    },

    /// Checksum validation failed for a received frame.
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// The checksum computed over the frame contents.
        expected: u8,
        /// The checksum byte carried by the frame.
        actual: u8,
    },

    /// No registered plugin matches a discovered device.
    #[error("No driver found for device {name} [{address}]")]
    NoDriverFound {
        /// The advertised device name (may be empty).
        name: String,
        /// The device address.
        address: String,
    },

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// The requested operation is not supported by this scale.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Scale not connected");

        let err = Error::ChecksumMismatch {
            expected: 0xC5,
            actual: 0x12,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0xc5, got 0x12");

        let err = Error::NoDriverFound {
            name: "UNKNOWN-99".to_string(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No driver found for device UNKNOWN-99 [AA:BB:CC:DD:EE:FF]"
        );
    }

    #[test]
    fn test_connection_failed_reason() {
        let err = Error::ConnectionFailed {
            reason: "peripheral vanished".to_string(),
        };
        assert!(err.to_string().contains("peripheral vanished"));
    }
}
