//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for scale communication, grouped by
//! vendor. Short 16-bit identifiers are expanded onto the Bluetooth base
//! UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).

use uuid::Uuid;

// Standard descriptors
/// Client Characteristic Configuration descriptor (notification enable).
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

// Acaia (Lunar, Pyxis, Pearl, ...)
/// Acaia legacy service, found on older firmware.
pub const ACAIA_LEGACY_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1820_0000_1000_8000_00805f9b34fb);
/// Acaia legacy characteristic (weight and commands share it).
pub const ACAIA_LEGACY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a80_0000_1000_8000_00805f9b34fb);
/// Acaia standard service.
pub const ACAIA_SERVICE_UUID: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
/// Acaia standard weight characteristic (Notify).
pub const ACAIA_WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);
/// Acaia standard command characteristic (Write).
pub const ACAIA_COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);
/// Acaia Umbra service (same wire protocol, different endpoints).
pub const ACAIA_UMBRA_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_fe40_cc7a_482a_984a_7f2ed5b3e58f);
/// Acaia Umbra command characteristic.
pub const ACAIA_UMBRA_COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fe41_8e22_4541_9d4c_21edae82ed19);
/// Acaia Umbra weight characteristic.
pub const ACAIA_UMBRA_WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fe42_8e22_4541_9d4c_21edae82ed19);

// Bookoo (Themis Mini)
/// Bookoo service.
pub const BOOKOO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0ffe_0000_1000_8000_00805f9b34fb);
/// Bookoo weight characteristic (Notify).
pub const BOOKOO_WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_ff11_0000_1000_8000_00805f9b34fb);
/// Bookoo command characteristic (Write).
pub const BOOKOO_COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_ff12_0000_1000_8000_00805f9b34fb);

// Decent Scale
/// Decent service.
pub const DECENT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fff0_0000_1000_8000_00805f9b34fb);
/// Decent read characteristic (Notify; tare is written here too).
pub const DECENT_READ_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff4_0000_1000_8000_00805f9b34fb);
/// Decent write characteristic.
pub const DECENT_WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_36f5_0000_1000_8000_00805f9b34fb);

// Difluid (Microbalance "Mb", Titanium "Ti")
/// Difluid Microbalance service.
pub const DIFLUID_MB_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_00ee_0000_1000_8000_00805f9b34fb);
/// Difluid Titanium service.
pub const DIFLUID_TI_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_00dd_0000_1000_8000_00805f9b34fb);
/// Difluid data characteristic (Notify + Write).
pub const DIFLUID_DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_aa01_0000_1000_8000_00805f9b34fb);

// Eclair
/// Eclair service.
pub const ECLAIR_SERVICE_UUID: Uuid = Uuid::from_u128(0xb905eaea_2e63_0e04_7582_7913f10d8f81);
/// Eclair data characteristic (weight / flow rate notifications).
pub const ECLAIR_DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xad736c5f_bbc9_1f96_d304_cb5d5f41e160);
/// Eclair config characteristic (commands, battery / timer notifications).
pub const ECLAIR_CONFIG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x4f9a45ba_8e1b_4e07_e157_0814d393b968);

// Eureka (Precisa)
/// Eureka service.
pub const EUREKA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fff0_0000_1000_8000_00805f9b34fb);
/// Eureka weight characteristic (Notify).
pub const EUREKA_WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff1_0000_1000_8000_00805f9b34fb);
/// Eureka command characteristic (Write).
pub const EUREKA_COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff2_0000_1000_8000_00805f9b34fb);

// Felicita (Arc, Incline)
/// Felicita service.
pub const FELICITA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);
/// Felicita data characteristic (Notify + Write).
pub const FELICITA_DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);

// Timemore (Black Mirror)
/// Timemore service (standard Weight Scale service).
pub const TIMEMORE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_181d_0000_1000_8000_00805f9b34fb);
/// Timemore weight characteristic (standard Weight Measurement, Indicate).
pub const TIMEMORE_WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a9d_0000_1000_8000_00805f9b34fb);
/// Timemore command characteristic (Write).
pub const TIMEMORE_COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x553f4e49_bf21_4468_9c6c_0e4fb5b17697);

// Varia (AKU)
/// Varia service.
pub const VARIA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fff0_0000_1000_8000_00805f9b34fb);
/// Varia weight characteristic (Notify).
pub const VARIA_WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff1_0000_1000_8000_00805f9b34fb);
/// Varia command characteristic (Write).
pub const VARIA_COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff2_0000_1000_8000_00805f9b34fb);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            FELICITA_SERVICE_UUID.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CCCD_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_vendor_uuid_format() {
        assert_eq!(
            ACAIA_SERVICE_UUID.to_string(),
            "49535343-fe7d-4ae5-8fa9-9fafd205e455"
        );
        assert_eq!(
            ECLAIR_SERVICE_UUID.to_string(),
            "b905eaea-2e63-0e04-7582-7913f10d8f81"
        );
        assert_eq!(
            TIMEMORE_COMMAND_CHARACTERISTIC_UUID.to_string(),
            "553f4e49-bf21-4468-9c6c-0e4fb5b17697"
        );
    }

    #[test]
    fn test_shared_base_services() {
        // Decent, Eureka and Varia all sit on the same 0xFFF0 service; the
        // registry must tell them apart by advertisement, never by service.
        assert_eq!(DECENT_SERVICE_UUID, EUREKA_SERVICE_UUID);
        assert_eq!(EUREKA_SERVICE_UUID, VARIA_SERVICE_UUID);
        assert_ne!(EUREKA_WEIGHT_CHARACTERISTIC_UUID, DECENT_READ_CHARACTERISTIC_UUID);
    }
}
