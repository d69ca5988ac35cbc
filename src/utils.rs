//! Utility functions for the brewscale-ble crate.

/// Grams per ounce (avoirdupois).
const GRAMS_PER_OUNCE: f32 = 28.349_523;

/// Convert grams to ounces.
///
/// # Arguments
///
/// * `grams` - Weight in grams
///
/// # Returns
///
/// Weight in ounces
///
/// # Example
///
/// ```
/// use brewscale_ble::grams_to_ounces;
///
/// let ounces = grams_to_ounces(28.349523);
/// assert!((ounces - 1.0).abs() < 0.001);
/// ```
#[inline]
pub fn grams_to_ounces(grams: f32) -> f32 {
    grams / GRAMS_PER_OUNCE
}

/// Convert ounces to grams.
///
/// # Arguments
///
/// * `ounces` - Weight in ounces
///
/// # Returns
///
/// Weight in grams
///
/// # Example
///
/// ```
/// use brewscale_ble::ounces_to_grams;
///
/// let grams = ounces_to_grams(1.0);
/// assert!((grams - 28.349523).abs() < 0.001);
/// ```
#[inline]
pub fn ounces_to_grams(ounces: f32) -> f32 {
    ounces * GRAMS_PER_OUNCE
}

/// Render a byte slice as a contiguous lowercase hex string.
///
/// Manufacturer-data matching and protocol log lines both rely on this
/// rendering, so the format is stable: two hex digits per byte, no separators.
///
/// # Example
///
/// ```
/// use brewscale_ble::hex_string;
///
/// assert_eq!(hex_string(&[0x04, 0x2a, 0xbc]), "042abc");
/// ```
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        // write! to a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}
